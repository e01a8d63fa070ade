use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// The three granularities tracked per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// 4-hour bars. The reference asset's impulses are segmented here.
    Coarse,
    /// 30-minute bars. Volume profile and TMO are computed here.
    Medium,
    /// 5-minute bars. Drives polling and intersection checks.
    Fine,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::Coarse, Timeframe::Medium, Timeframe::Fine];

    /// Wire interval string understood by the data provider.
    pub fn interval(&self) -> &'static str {
        match self {
            Timeframe::Coarse => "4h",
            Timeframe::Medium => "30m",
            Timeframe::Fine => "5m",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::Coarse => 240,
            Timeframe::Medium => 30,
            Timeframe::Fine => 5,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::minutes(self.minutes())
    }

    /// History depth fetched on a full ingest.
    pub fn default_limit(&self) -> usize {
        match self {
            Timeframe::Coarse => 500,
            Timeframe::Medium => 1000,
            Timeframe::Fine => 500,
        }
    }

    /// Start of the bar containing `time`.
    pub fn floor(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let bar_ms = self.minutes() * 60_000;
        let ms = time.timestamp_millis();
        let floored = ms - ms.rem_euclid(bar_ms);
        DateTime::from_timestamp_millis(floored).unwrap_or(time)
    }

    /// `[start, end]` request window covering the last `limit` completed bars.
    pub fn window(&self, now: DateTime<Utc>, limit: usize) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.floor(now);
        let start = end - self.duration() * limit as i32;
        (start, end)
    }

    /// `[start, end]` request window covering exactly the last completed bar.
    pub fn last_completed(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        self.window(now, 1)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.interval())
    }
}
