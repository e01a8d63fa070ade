use serde::{Deserialize, Serialize};

use crate::candle::Candle;
use crate::error::AnalysisError;

/// True momentum oscillator parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TmoParams {
    pub length: usize,
    pub calc_length: usize,
    pub smooth_length: usize,
}

impl Default for TmoParams {
    fn default() -> Self {
        Self {
            length: 14,
            calc_length: 5,
            smooth_length: 3,
        }
    }
}

/// Bars of 30m history per aggregated TMO bar window.
pub const BARS_PER_WINDOW: usize = 50;

/// Oscillator values attached to a medium bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TmoValues {
    pub tmo30: Option<f64>,
    pub tmo60: Option<f64>,
    pub tmo180: Option<f64>,
    pub tmo240: Option<f64>,
}

impl TmoValues {
    /// Mean of the 30m, 60m and 180m readings.
    pub fn x3(&self) -> Option<f64> {
        Some((self.tmo30? + self.tmo60? + self.tmo180?) / 3.0)
    }
}

/// TMO of the last bar in `candles`.
pub fn tmo(candles: &[Candle], params: TmoParams) -> Result<f64, AnalysisError> {
    let count = candles.len();
    if count < params.length {
        return Err(AnalysisError::InsufficientData {
            needed: params.length,
            available: count,
        });
    }

    let mut data = vec![0.0; count];
    for i in params.length..count {
        let close = candles[i].close;
        data[i] = (1..params.length)
            .map(|j| {
                let open = candles[i - j].open;
                if close > open {
                    1.0
                } else if close < open {
                    -1.0
                } else {
                    0.0
                }
            })
            .sum();
    }

    let ema1 = ema(&data, params.calc_length);
    let main = ema(&ema1, params.smooth_length);
    Ok(15.0 * main[count - 1] / params.length as f64)
}

fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    out.push(values[0]);
    for &value in &values[1..] {
        let prev = out[out.len() - 1];
        out.push(alpha * value + (1.0 - alpha) * prev);
    }
    out
}

/// Merge consecutive groups of `factor` bars. A trailing partial group is dropped.
pub fn aggregate(candles: &[Candle], factor: usize) -> Vec<Candle> {
    if factor <= 1 {
        return candles.to_vec();
    }
    candles
        .chunks_exact(factor)
        .enumerate()
        .map(|(i, chunk)| {
            let first = &chunk[0];
            let last = &chunk[chunk.len() - 1];
            Candle {
                index: i,
                open_time: first.open_time,
                close_time: last.close_time,
                open: first.open,
                high: chunk.iter().map(|c| c.high).fold(f64::MIN, f64::max),
                low: chunk.iter().map(|c| c.low).fold(f64::MAX, f64::min),
                close: last.close,
                volume: chunk.iter().map(|c| c.volume).sum(),
                ..Default::default()
            }
        })
        .collect()
}

/// TMO of the newest bar after aggregating 30m candles up to `minutes`.
pub fn last_tmo_for_timeframe(candles: &[Candle], minutes: usize) -> Result<f64, AnalysisError> {
    if minutes < 30 || minutes % 30 != 0 {
        return Err(AnalysisError::InvalidData(format!(
            "aggregate timeframe {minutes}m is not a multiple of 30m"
        )));
    }
    let factor = minutes / 30;
    let take = factor * BARS_PER_WINDOW;
    let tail = &candles[candles.len().saturating_sub(take)..];
    tmo(&aggregate(tail, factor), TmoParams::default())
}

/// Fill `tmo` on every medium bar that has enough history behind it.
///
/// `with_240` additionally computes the 4h-equivalent reading (reference asset only).
pub fn fill_history(candles: &mut [Candle], with_240: bool) {
    let params = TmoParams::default();
    for i in 0..candles.len() {
        let end = i + 1;
        let tmo30 = window_tmo(&candles[..end], 1, params);
        let tmo60 = window_tmo(&candles[..end], 2, params);
        let tmo180 = window_tmo(&candles[..end], 6, params);
        let tmo240 = if with_240 {
            window_tmo(&candles[..end], 8, params)
        } else {
            None
        };
        candles[i].tmo = TmoValues {
            tmo30,
            tmo60,
            tmo180,
            tmo240,
        };
    }
}

fn window_tmo(history: &[Candle], factor: usize, params: TmoParams) -> Option<f64> {
    let take = factor * BARS_PER_WINDOW;
    if history.len() < take {
        return None;
    }
    tmo(&aggregate(&history[history.len() - take..], factor), params).ok()
}

/// Recompute all readings on the newest medium bar only.
pub fn fill_last(candles: &mut [Candle], with_240: bool) -> Result<(), AnalysisError> {
    let tmo30 = last_tmo_for_timeframe(candles, 30)?;
    let tmo60 = last_tmo_for_timeframe(candles, 60).ok();
    let tmo180 = last_tmo_for_timeframe(candles, 180).ok();
    let tmo240 = if with_240 {
        last_tmo_for_timeframe(candles, 240).ok()
    } else {
        None
    };
    if let Some(last) = candles.last_mut() {
        last.tmo = TmoValues {
            tmo30: Some(tmo30),
            tmo60,
            tmo180,
            tmo240,
        };
    }
    Ok(())
}

/// Reference oscillator: TMO over a rolling `window` of coarse bars.
/// Bars without a full window behind them get `None`.
pub fn rolling_reference(candles: &[Candle], window: usize) -> Vec<Option<f64>> {
    let params = TmoParams::default();
    (0..candles.len())
        .map(|i| {
            if i + 1 < window {
                None
            } else {
                tmo(&candles[i + 1 - window..=i], params).ok()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_support::series_from_closes;
    use crate::timeframe::Timeframe;

    fn trending(n: usize, step: f64) -> Vec<Candle> {
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + step * i as f64).collect();
        series_from_closes(Timeframe::Medium, &closes)
            .candles()
            .to_vec()
    }

    #[test]
    fn rising_market_reads_overbought() {
        let value = tmo(&trending(50, 1.0), TmoParams::default()).unwrap();
        assert!(value > 7.0, "got {value}");
        assert!(value < 15.0);
    }

    #[test]
    fn falling_market_reads_oversold() {
        let value = tmo(&trending(50, -1.0), TmoParams::default()).unwrap();
        assert!(value < -7.0, "got {value}");
    }

    #[test]
    fn flat_market_reads_zero() {
        let value = tmo(&trending(50, 0.0), TmoParams::default()).unwrap();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn short_input_is_rejected() {
        let err = tmo(&trending(10, 1.0), TmoParams::default()).unwrap_err();
        assert_eq!(
            err,
            AnalysisError::InsufficientData {
                needed: 14,
                available: 10
            }
        );
    }

    #[test]
    fn aggregate_merges_groups() {
        let mut candles = trending(7, 1.0);
        candles[1].high = 500.0;
        candles[2].low = 1.0;
        let merged = aggregate(&candles, 2);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].open, candles[0].open);
        assert_eq!(merged[0].close, candles[1].close);
        assert_eq!(merged[0].high, 500.0);
        assert_eq!(merged[1].low, 1.0);
        assert_eq!(merged[1].volume, 20.0);
        assert_eq!(merged[2].close_time, candles[5].close_time);
    }

    #[test]
    fn history_fill_leaves_warmup_empty() {
        let mut candles = trending(320, 1.0);
        fill_history(&mut candles, false);
        assert!(candles[48].tmo.tmo30.is_none());
        assert!(candles[49].tmo.tmo30.is_some());
        assert!(candles[98].tmo.tmo60.is_none());
        assert!(candles[99].tmo.tmo60.is_some());
        assert!(candles[299].tmo.tmo180.is_some());
        assert!(candles[319].tmo.tmo240.is_none());
        assert!(candles[319].tmo.x3().unwrap() > 7.0);
    }

    #[test]
    fn last_fill_matches_history_fill() {
        let mut full = trending(400, 0.5);
        fill_history(&mut full, true);
        let mut last = trending(400, 0.5);
        fill_last(&mut last, true).unwrap();
        assert_eq!(full[399].tmo, last[399].tmo);
    }

    #[test]
    fn rolling_reference_warms_up() {
        let values = rolling_reference(&trending(60, 1.0), 50);
        assert_eq!(values.len(), 60);
        assert!(values[48].is_none());
        assert!(values[49].unwrap() > 7.0);
    }
}
