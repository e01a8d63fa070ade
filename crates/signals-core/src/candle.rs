use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators::tmo::TmoValues;
use crate::indicators::zscore::ZScore;
use crate::ladder::ProfileLevels;

/// A single OHLCV candle plus the indicator values attached to it.
///
/// Market fields never change after the candle is appended to a series; only the
/// derived fields below `volume` are written by indicator passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Position within its series.
    pub index: usize,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    #[serde(default)]
    pub smoothed_close: f64,
    #[serde(default)]
    pub tmo: TmoValues,
    #[serde(default)]
    pub z_score: Option<ZScore>,
    #[serde(default)]
    pub profile: Option<ProfileLevels>,
}

impl Candle {
    pub fn is_green(&self) -> bool {
        self.close >= self.open
    }

    pub fn body_top(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_bottom(&self) -> f64 {
        self.open.min(self.close)
    }
}

/// Lightweight reference to a candle inside some series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandleRef {
    pub index: usize,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub close: f64,
}

impl From<&Candle> for CandleRef {
    fn from(candle: &Candle) -> Self {
        Self {
            index: candle.index,
            open_time: candle.open_time,
            close_time: candle.close_time,
            close: candle.close,
        }
    }
}
