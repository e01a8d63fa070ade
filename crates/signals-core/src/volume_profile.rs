//! Volume-at-price histogram over a candle window, its point of control, and
//! the volume-weighted rolling smoother applied to successive POCs.

use std::collections::VecDeque;

use tracing::debug;

use crate::candle::Candle;
use crate::error::AnalysisError;
use crate::ladder::{Ladder, ProfileLevels};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileConfig {
    /// Candles per profile window.
    pub window_size: usize,
    /// Price bins per window.
    pub row_size: usize,
    /// Share of total volume the value area must cover.
    pub value_area_percent: f64,
    /// Raw POCs averaged by the smoother.
    pub period: usize,
    /// Extra windows computed beyond `period` on a full build.
    pub history: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            window_size: 24,
            row_size: 24,
            value_area_percent: 30.0,
            period: 36,
            history: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeProfile {
    pub raw_poc: f64,
    pub value_area_top: f64,
    pub value_area_bottom: f64,
}

/// Profile of an entire window.
pub fn compute(
    window: &[Candle],
    row_size: usize,
    value_area_percent: f64,
) -> Result<VolumeProfile, AnalysisError> {
    if window.is_empty() || row_size == 0 {
        return Err(AnalysisError::InsufficientData {
            needed: 1,
            available: window.len(),
        });
    }

    let top = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let bottom = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let step = (top - bottom) / row_size as f64;
    let bounds: Vec<f64> = (0..=row_size).map(|i| bottom + step * i as f64).collect();

    let mut up = vec![0.0; row_size];
    let mut down = vec![0.0; row_size];
    for candle in window {
        let body_top = candle.body_top();
        let body_bottom = candle.body_bottom();
        let top_wick = candle.high - body_top;
        let bottom_wick = body_bottom - candle.low;
        let body = body_top - body_bottom;
        let denominator = 2.0 * top_wick + 2.0 * bottom_wick + body;
        if denominator == 0.0 {
            continue;
        }
        let body_volume = body * candle.volume / denominator;
        let top_wick_volume = 2.0 * top_wick * candle.volume / denominator;
        let bottom_wick_volume = 2.0 * bottom_wick * candle.volume / denominator;

        for j in 0..row_size {
            let (lo, hi) = (bounds[j], bounds[j + 1]);
            let body_share = overlap_volume(lo, hi, body_bottom, body_top, body, body_volume);
            if candle.is_green() {
                up[j] += body_share;
            } else {
                down[j] += body_share;
            }
            let wicks = overlap_volume(lo, hi, body_top, candle.high, top_wick, top_wick_volume)
                + overlap_volume(lo, hi, candle.low, body_bottom, bottom_wick, bottom_wick_volume);
            up[j] += wicks / 2.0;
            down[j] += wicks / 2.0;
        }
    }

    let totals: Vec<f64> = up.iter().zip(&down).map(|(u, d)| u + d).collect();
    let mut poc = 0;
    for (i, &volume) in totals.iter().enumerate() {
        if volume > totals[poc] {
            poc = i;
        }
    }

    let (va_low, va_high) = value_area(&totals, poc, value_area_percent);
    Ok(VolumeProfile {
        raw_poc: (bounds[poc] + bounds[poc + 1]) / 2.0,
        value_area_top: bounds[va_high + 1],
        value_area_bottom: bounds[va_low],
    })
}

/// Grow the value area out of `poc` one bin at a time, favouring the upper
/// neighbour on ties. Returns the inclusive bin range.
fn value_area(totals: &[f64], poc: usize, percent: f64) -> (usize, usize) {
    let target = totals.iter().sum::<f64>() * percent / 100.0;
    let mut covered = totals[poc];
    let (mut low, mut high) = (poc, poc);
    while covered < target {
        let upper = if high + 1 < totals.len() { totals[high + 1] } else { 0.0 };
        let lower = if low > 0 { totals[low - 1] } else { 0.0 };
        if upper == 0.0 && lower == 0.0 {
            break;
        }
        if upper >= lower {
            covered += upper;
            high += 1;
        } else {
            covered += lower;
            low -= 1;
        }
    }
    (low, high)
}

/// Volume credited to bin `[lo, hi]` from a portion spread evenly over `[a, b]`.
fn overlap_volume(lo: f64, hi: f64, a: f64, b: f64, height: f64, volume: f64) -> f64 {
    if height == 0.0 {
        return 0.0;
    }
    let overlap = hi.max(lo).min(a.max(b)) - lo.min(hi).max(a.min(b));
    overlap.max(0.0) * volume / height
}

/// Profile of the window ending at `end` (inclusive).
pub fn compute_at(
    candles: &[Candle],
    end: usize,
    config: &ProfileConfig,
) -> Result<VolumeProfile, AnalysisError> {
    if end >= candles.len() {
        return Err(AnalysisError::OutOfBounds {
            index: end,
            len: candles.len(),
        });
    }
    if end + 1 < config.window_size {
        return Err(AnalysisError::InsufficientData {
            needed: config.window_size,
            available: end + 1,
        });
    }
    let window = &candles[end + 1 - config.window_size..=end];
    compute(window, config.row_size, config.value_area_percent)
}

/// Trailing volume-weighted average of raw POCs over `period` consecutive bars.
///
/// Bars must be observed in index order with no gaps. Re-observing the newest
/// bar replaces its entry.
#[derive(Debug, Clone)]
pub struct RollingPoc {
    period: usize,
    entries: VecDeque<PocEntry>,
    volume_sum: f64,
    weighted_sum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PocEntry {
    index: usize,
    volume: f64,
    raw_poc: f64,
}

impl RollingPoc {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            entries: VecDeque::with_capacity(period + 1),
            volume_sum: 0.0,
            weighted_sum: 0.0,
        }
    }

    pub fn last_index(&self) -> Option<usize> {
        self.entries.back().map(|e| e.index)
    }

    /// Feed bar `index` and return the smoothed POC.
    pub fn observe(
        &mut self,
        candle: &Candle,
        raw_poc: f64,
    ) -> Result<f64, AnalysisError> {
        let entry = PocEntry {
            index: candle.index,
            volume: candle.volume,
            raw_poc,
        };
        match self.entries.back().copied() {
            Some(last) if last.index == entry.index => {
                if last != entry {
                    self.entries.pop_back();
                    self.entries.push_back(entry);
                    self.recompute();
                }
            }
            Some(last) if entry.index == last.index + 1 => {
                self.push(entry);
            }
            Some(last) if entry.index > last.index => {
                return Err(AnalysisError::MissingPoc {
                    index: last.index + 1,
                    open_time: candle.open_time,
                });
            }
            Some(last) => {
                return Err(AnalysisError::InvalidData(format!(
                    "POC for bar {} observed after bar {}",
                    entry.index, last.index
                )));
            }
            None => self.push(entry),
        }
        Ok(self.value())
    }

    fn push(&mut self, entry: PocEntry) {
        self.volume_sum += entry.volume;
        self.weighted_sum += entry.raw_poc * entry.volume;
        self.entries.push_back(entry);
        if self.entries.len() > self.period
            && let Some(old) = self.entries.pop_front()
        {
            self.volume_sum -= old.volume;
            self.weighted_sum -= old.raw_poc * old.volume;
        }
    }

    fn recompute(&mut self) {
        self.volume_sum = self.entries.iter().map(|e| e.volume).sum();
        self.weighted_sum = self.entries.iter().map(|e| e.raw_poc * e.volume).sum();
    }

    pub fn value(&self) -> f64 {
        if self.volume_sum > 0.0 {
            self.weighted_sum / self.volume_sum
        } else {
            self.entries.back().map(|e| e.raw_poc).unwrap_or_default()
        }
    }
}

/// Profile the last `period + history` windows, smooth them, and attach ladder
/// levels to the closing bar of each window.
pub fn build_history(
    candles: &mut [Candle],
    config: &ProfileConfig,
    ladder: &Ladder,
) -> Result<RollingPoc, AnalysisError> {
    if candles.len() < config.window_size {
        return Err(AnalysisError::InsufficientData {
            needed: config.window_size,
            available: candles.len(),
        });
    }
    let windows = candles.len() - config.window_size + 1;
    let first_window = windows.saturating_sub(config.period + config.history);
    let first_end = first_window + config.window_size - 1;

    let mut smoother = RollingPoc::new(config.period);
    for end in first_end..candles.len() {
        let profile = compute_at(candles, end, config)?;
        let smoothed = smoother.observe(&candles[end], profile.raw_poc)?;
        candles[end].profile = Some(levels(&profile, smoothed, ladder));
    }
    debug!(
        windows = candles.len() - first_end,
        smoothed_poc = smoother.value(),
        "Built volume profile history"
    );
    Ok(smoother)
}

/// Profile the newest window only and refresh its levels.
pub fn update_last(
    candles: &mut [Candle],
    config: &ProfileConfig,
    ladder: &Ladder,
    smoother: &mut RollingPoc,
) -> Result<ProfileLevels, AnalysisError> {
    let end = candles.len().checked_sub(1).ok_or(AnalysisError::InsufficientData {
        needed: config.window_size,
        available: 0,
    })?;
    let profile = compute_at(candles, end, config)?;
    let smoothed = smoother.observe(&candles[end], profile.raw_poc)?;
    let levels = levels(&profile, smoothed, ladder);
    candles[end].profile = Some(levels.clone());
    Ok(levels)
}

fn levels(profile: &VolumeProfile, smoothed_poc: f64, ladder: &Ladder) -> ProfileLevels {
    ProfileLevels {
        raw_poc: profile.raw_poc,
        smoothed_poc,
        value_area_top: profile.value_area_top,
        value_area_bottom: profile.value_area_bottom,
        levels: ladder.price(smoothed_poc),
    }
}
