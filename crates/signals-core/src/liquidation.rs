use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candle::Candle;
use crate::error::AnalysisError;
use crate::indicators::ZScore;
use crate::ladder::{self, LiquidationIntersection, OffsetKey};
use crate::{percentage_change, price_precision};

/// Fine bars scanned for the overbought/oversold position.
pub const POSITION_LOOKBACK: usize = 360;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bias {
    Long,
    Short,
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bias::Long => f.write_str("LONG"),
            Bias::Short => f.write_str("SHORT"),
        }
    }
}

/// Which bar and which test produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalSource {
    Medium,
    Fine,
    /// Fine bar, wick ranges only.
    StrictFine,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidationHit {
    pub price: f64,
    pub offset: OffsetKey,
    pub rank: u8,
    pub close_time: DateTime<Utc>,
}

impl LiquidationHit {
    fn new(hit: LiquidationIntersection, candle: &Candle) -> Self {
        Self {
            price: hit.price,
            offset: hit.offset,
            rank: hit.rank,
            close_time: candle.close_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationSignal {
    pub symbol: String,
    pub source: SignalSource,
    pub hit: Option<LiquidationHit>,
    /// Long when the smoothed POC sits below the bar's smoothed close.
    pub bias: Bias,
    pub smoothed_poc: f64,
    /// Signed distance from the POC to the last fine close, in percent.
    pub poc_change: f64,
    /// Position of the last fine close inside the recent fine high/low range, in percent.
    pub change_ov: f64,
    pub tmo30: Option<f64>,
    pub tmo_x3: Option<f64>,
    pub z_score: Option<ZScore>,
    /// Decimals used when displaying prices.
    pub precision: usize,
}

impl LiquidationSignal {
    pub fn is_above_poc(&self) -> bool {
        self.poc_change > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub medium: LiquidationSignal,
    pub fine: LiquidationSignal,
    pub strict_fine: LiquidationSignal,
}

/// Test the newest medium and fine bars against the medium bar's ladder.
pub fn assess(symbol: &str, medium: &[Candle], fine: &[Candle]) -> Result<SignalSet, AnalysisError> {
    let (Some(medium_last), Some(fine_last)) = (medium.last(), fine.last()) else {
        return Err(AnalysisError::InsufficientData {
            needed: 1,
            available: medium.len().min(fine.len()),
        });
    };
    let levels = medium_last
        .profile
        .as_ref()
        .ok_or(AnalysisError::MissingPoc {
            index: medium_last.index,
            open_time: medium_last.open_time,
        })?;

    let poc = levels.smoothed_poc;
    if poc == 0.0 {
        return Err(AnalysisError::ZeroPrice {
            index: medium_last.index,
        });
    }

    let base = LiquidationSignal {
        symbol: symbol.to_string(),
        source: SignalSource::Medium,
        hit: None,
        bias: bias(poc, medium_last.smoothed_close),
        smoothed_poc: poc,
        poc_change: percentage_change(poc, fine_last.close),
        change_ov: position_in_range(fine),
        tmo30: medium_last.tmo.tmo30,
        tmo_x3: medium_last.tmo.x3(),
        z_score: fine_last.z_score,
        precision: price_precision(medium_last.open),
    };

    let medium_signal = LiquidationSignal {
        hit: ladder::intersect(levels, medium_last).map(|h| LiquidationHit::new(h, medium_last)),
        ..base.clone()
    };
    let fine_bias = bias(poc, fine_last.smoothed_close);
    let fine_signal = LiquidationSignal {
        source: SignalSource::Fine,
        hit: ladder::intersect(levels, fine_last).map(|h| LiquidationHit::new(h, fine_last)),
        bias: fine_bias,
        ..base.clone()
    };
    let strict_signal = LiquidationSignal {
        source: SignalSource::StrictFine,
        hit: ladder::intersect_strict(levels, fine_last).map(|h| LiquidationHit::new(h, fine_last)),
        bias: fine_bias,
        ..base
    };

    Ok(SignalSet {
        medium: medium_signal,
        fine: fine_signal,
        strict_fine: strict_signal,
    })
}

fn bias(poc: f64, smoothed_close: f64) -> Bias {
    if poc < smoothed_close {
        Bias::Long
    } else {
        Bias::Short
    }
}

fn position_in_range(fine: &[Candle]) -> f64 {
    let recent = &fine[fine.len().saturating_sub(POSITION_LOOKBACK)..];
    let high = recent.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = recent.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let range = high - low;
    match recent.last() {
        Some(last) if range > 0.0 => (last.close - low) / range * 100.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::{Ladder, ProfileLevels};
    use crate::series::test_support::series_from_closes;
    use crate::timeframe::Timeframe;

    fn medium_with_poc(poc: f64, smoothed_close: f64) -> Vec<Candle> {
        let mut candles = series_from_closes(Timeframe::Medium, &[100.0; 3])
            .candles()
            .to_vec();
        let last = candles.last_mut().unwrap();
        last.smoothed_close = smoothed_close;
        last.open = 100.25;
        last.profile = Some(ProfileLevels {
            raw_poc: poc,
            smoothed_poc: poc,
            value_area_top: poc,
            value_area_bottom: poc,
            levels: Ladder::for_timeframe(Timeframe::Medium).price(poc),
        });
        candles
    }

    #[test]
    fn fine_bar_through_a_rung_is_a_hit() {
        let medium = medium_with_poc(100.0, 108.0);
        let mut fine = series_from_closes(Timeframe::Fine, &[100.0, 104.0, 109.0])
            .candles()
            .to_vec();
        fine[2].high = 111.0;
        fine[2].low = 107.0;
        fine[2].smoothed_close = 109.0;

        let set = assess("ETHUSDT", &medium, &fine).unwrap();
        let hit = set.fine.hit.unwrap();
        assert_eq!(hit.offset, OffsetKey(100));
        assert_eq!(hit.rank, 5);
        assert_eq!(set.fine.bias, Bias::Long);
        assert!((set.fine.poc_change - 9.0).abs() < 1e-9);
        assert!(set.medium.hit.is_none());
        assert_eq!(set.medium.precision, 2);
        // 109 sits at (109 - 99.9) / (111 - 99.9) of the range.
        assert!((set.fine.change_ov - 9.1 / 11.1 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn missing_profile_fails_fast() {
        let medium = series_from_closes(Timeframe::Medium, &[100.0; 3])
            .candles()
            .to_vec();
        let fine = series_from_closes(Timeframe::Fine, &[100.0; 3])
            .candles()
            .to_vec();
        let err = assess("ETHUSDT", &medium, &fine).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingPoc { index: 2, .. }));
    }

    #[test]
    fn bias_follows_smoothed_close() {
        let medium = medium_with_poc(100.0, 95.0);
        let fine = series_from_closes(Timeframe::Fine, &[96.0; 3])
            .candles()
            .to_vec();
        let set = assess("ETHUSDT", &medium, &fine).unwrap();
        assert_eq!(set.medium.bias, Bias::Short);
        assert!(!set.fine.is_above_poc());
    }
}
