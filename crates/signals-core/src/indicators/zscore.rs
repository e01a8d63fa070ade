use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ZScore {
    pub value: f64,
    pub inverted: f64,
}

/// Z-score of `values[index]` against a weighted moving average and the sample
/// standard deviation of the trailing windows. Returns zero when there is not
/// enough history or the window is flat.
pub fn z_score(values: &[f64], index: usize, average_length: usize, stdev_length: usize) -> ZScore {
    let lookback = average_length.max(stdev_length);
    if index >= values.len() || index + 1 < lookback {
        return ZScore::default();
    }

    let mean = weighted_mean(values, index, average_length);
    let stdev = sample_stdev(values, index, stdev_length);
    if stdev == 0.0 {
        return ZScore::default();
    }
    let value = (values[index] - mean) / stdev;
    ZScore {
        value,
        inverted: -value,
    }
}

fn weighted_mean(values: &[f64], index: usize, length: usize) -> f64 {
    let mut sum = 0.0;
    let mut weights = 0.0;
    for weight in 1..=length {
        let w = weight as f64;
        sum += w * values[index + weight - length];
        weights += w;
    }
    sum / weights
}

fn sample_stdev(values: &[f64], index: usize, length: usize) -> f64 {
    if length <= 1 {
        return 0.0;
    }
    let window = &values[index + 1 - length..=index];
    let mean = window.iter().sum::<f64>() / length as f64;
    let squares: f64 = window.iter().map(|v| (v - mean).powi(2)).sum();
    (squares / (length - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_window_is_zero() {
        let values = vec![3.0; 80];
        assert_eq!(z_score(&values, 79, 72, 72), ZScore::default());
    }

    #[test]
    fn short_history_is_zero() {
        let values = vec![1.0, 2.0, 3.0];
        assert_eq!(z_score(&values, 2, 72, 72), ZScore::default());
    }

    #[test]
    fn spike_scores_positive() {
        let mut values: Vec<f64> = (0..12).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        values.push(20.0);
        let score = z_score(&values, 12, 12, 12);
        assert!(score.value > 2.0, "got {}", score.value);
        assert_eq!(score.inverted, -score.value);
    }
}
