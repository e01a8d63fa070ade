use crate::candle::Candle;
use crate::error::AnalysisError;

pub const DEFAULT_PERIOD: usize = 7;

/// Least-squares moving average of closes, written to `smoothed_close`.
/// Bars before the first full period are set to zero.
pub fn smooth(candles: &mut [Candle], period: usize) {
    for i in 0..candles.len() {
        candles[i].smoothed_close = if i + 1 >= period {
            let window: Vec<f64> = candles[i + 1 - period..=i].iter().map(|c| c.close).collect();
            regression_endpoint(&window)
        } else {
            0.0
        };
    }
}

/// Recompute `smoothed_close` of the newest bar only.
pub fn smooth_last(candles: &mut [Candle], period: usize) -> Result<(), AnalysisError> {
    if candles.len() < period {
        return Err(AnalysisError::InsufficientData {
            needed: period,
            available: candles.len(),
        });
    }
    let window: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(|c| c.close)
        .collect();
    let value = regression_endpoint(&window);
    if let Some(last) = candles.last_mut() {
        last.smoothed_close = value;
    }
    Ok(())
}

fn regression_endpoint(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }
    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return values.last().copied().unwrap_or_default();
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    slope * (n - 1.0) + intercept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_support::series_from_closes;
    use crate::timeframe::Timeframe;

    #[test]
    fn linear_closes_are_reproduced() {
        let closes: Vec<f64> = (0..10).map(|i| 10.0 + 2.0 * i as f64).collect();
        let mut series = series_from_closes(Timeframe::Fine, &closes);
        smooth(series.candles_mut(), DEFAULT_PERIOD);
        let candles = series.candles();
        assert_eq!(candles[5].smoothed_close, 0.0);
        for candle in &candles[6..] {
            assert!((candle.smoothed_close - candle.close).abs() < 1e-9);
        }
    }

    #[test]
    fn last_item_matches_full_pass() {
        let closes = [5.0, 7.0, 6.0, 9.0, 8.0, 11.0, 10.0, 12.0];
        let mut full = series_from_closes(Timeframe::Fine, &closes);
        smooth(full.candles_mut(), DEFAULT_PERIOD);
        let mut last = series_from_closes(Timeframe::Fine, &closes);
        smooth_last(last.candles_mut(), DEFAULT_PERIOD).unwrap();
        let a = full.last().unwrap().smoothed_close;
        let b = last.last().unwrap().smoothed_close;
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn last_item_needs_a_full_period() {
        let mut series = series_from_closes(Timeframe::Fine, &[1.0, 2.0]);
        assert!(smooth_last(series.candles_mut(), DEFAULT_PERIOD).is_err());
    }
}
