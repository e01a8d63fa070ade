use serde::{Deserialize, Serialize};

use crate::candle::Candle;
use crate::timeframe::Timeframe;

/// Ladder offset from the smoothed POC, in tenths of a percent (`+33.3%` is `333`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OffsetKey(pub i16);

impl OffsetKey {
    pub fn percent(&self) -> f64 {
        f64::from(self.0) / 10.0
    }

    pub fn is_above(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for OffsetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 > 0 { "+" } else { "-" };
        let tenths = self.0.unsigned_abs();
        if tenths % 10 == 0 {
            write!(f, "{sign}{} Poc", tenths / 10)
        } else {
            write!(f, "{sign}{}.{} Poc", tenths / 10, tenths % 10)
        }
    }
}

/// One rung of the ladder: its offset, price multiplier and depth rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderLevel {
    pub offset: OffsetKey,
    pub multiplier: f64,
    pub rank: u8,
}

const fn level(tenths: i16, multiplier: f64, rank: u8) -> LadderLevel {
    LadderLevel {
        offset: OffsetKey(tenths),
        multiplier,
        rank,
    }
}

const FULL: [LadderLevel; 16] = [
    level(500, 1.5, 8),
    level(333, 1.333, 7),
    level(200, 1.2, 6),
    level(100, 1.1, 5),
    level(66, 1.066, 4),
    level(50, 1.05, 3),
    level(33, 1.033, 2),
    level(20, 1.02, 1),
    level(-20, 0.98, 1),
    level(-33, 0.967, 2),
    level(-50, 0.95, 3),
    level(-66, 0.934, 4),
    level(-100, 0.9, 5),
    level(-200, 0.8, 6),
    level(-333, 0.666, 7),
    level(-500, 0.5, 8),
];

/// The set of rungs used on one timeframe, ordered deepest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Ladder {
    levels: Vec<LadderLevel>,
}

impl Ladder {
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        let keep: &[i16] = match timeframe {
            Timeframe::Coarse => &[100, 200, 333, 500],
            Timeframe::Medium => &[50, 100, 200, 333, 500],
            Timeframe::Fine => &[20, 33, 50, 66, 100],
        };
        let mut levels: Vec<LadderLevel> = FULL
            .iter()
            .filter(|l| keep.contains(&l.offset.0.abs()))
            .copied()
            .collect();
        levels.sort_by(|a, b| b.rank.cmp(&a.rank).then(b.offset.cmp(&a.offset)));
        Self { levels }
    }

    pub fn levels(&self) -> &[LadderLevel] {
        &self.levels
    }

    /// Price every rung from `smoothed_poc`.
    pub fn price(&self, smoothed_poc: f64) -> Vec<PricedLevel> {
        self.levels
            .iter()
            .map(|l| PricedLevel {
                offset: l.offset,
                rank: l.rank,
                price: smoothed_poc * l.multiplier,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricedLevel {
    pub offset: OffsetKey,
    pub rank: u8,
    pub price: f64,
}

/// Volume-profile levels attached to the last bar of a profile window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileLevels {
    pub raw_poc: f64,
    pub smoothed_poc: f64,
    pub value_area_top: f64,
    pub value_area_bottom: f64,
    /// Offset rungs, deepest first.
    pub levels: Vec<PricedLevel>,
}

impl ProfileLevels {
    pub fn level(&self, offset: OffsetKey) -> Option<&PricedLevel> {
        self.levels.iter().find(|l| l.offset == offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidationIntersection {
    pub price: f64,
    pub offset: OffsetKey,
    pub rank: u8,
}

impl From<&PricedLevel> for LiquidationIntersection {
    fn from(level: &PricedLevel) -> Self {
        Self {
            price: level.price,
            offset: level.offset,
            rank: level.rank,
        }
    }
}

/// First (deepest) rung strictly inside the candle's `(low, high)` range.
pub fn intersect(levels: &ProfileLevels, candle: &Candle) -> Option<LiquidationIntersection> {
    levels
        .levels
        .iter()
        .find(|l| l.price > candle.low && l.price < candle.high)
        .map(LiquidationIntersection::from)
}

/// Like [`intersect`], but only the wick-side support and resistance ranges of
/// the candle count.
pub fn intersect_strict(levels: &ProfileLevels, candle: &Candle) -> Option<LiquidationIntersection> {
    let (resistance, support) = if candle.open > candle.close {
        ((candle.open, candle.high), (candle.low, candle.close))
    } else {
        ((candle.close, candle.high), (candle.low, candle.open))
    };
    let inside = |price: f64, (start, end): (f64, f64)| price > start && price < end;
    levels
        .levels
        .iter()
        .find(|l| inside(l.price, support) || inside(l.price, resistance))
        .map(LiquidationIntersection::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(poc: f64, timeframe: Timeframe) -> ProfileLevels {
        ProfileLevels {
            raw_poc: poc,
            smoothed_poc: poc,
            value_area_top: poc,
            value_area_bottom: poc,
            levels: Ladder::for_timeframe(timeframe).price(poc),
        }
    }

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open,
            high,
            low,
            close,
            ..Default::default()
        }
    }

    #[test]
    fn ten_percent_rungs_are_exact() {
        for poc in [1.0, 0.000123, 64_250.5, 3.3] {
            let levels = profile(poc, Timeframe::Medium);
            assert_eq!(levels.level(OffsetKey(100)).unwrap().price, poc * 1.10);
            assert_eq!(levels.level(OffsetKey(-100)).unwrap().price, poc * 0.90);
        }
    }

    #[test]
    fn timeframe_sets() {
        let medium = Ladder::for_timeframe(Timeframe::Medium);
        assert_eq!(medium.levels().len(), 10);
        assert_eq!(medium.levels()[0].rank, 8);
        assert_eq!(medium.levels().last().unwrap().rank, 3);

        let fine = Ladder::for_timeframe(Timeframe::Fine);
        assert!(fine.levels().iter().all(|l| l.rank <= 5));
        assert_eq!(Ladder::for_timeframe(Timeframe::Coarse).levels().len(), 8);
    }

    #[test]
    fn offset_labels() {
        assert_eq!(OffsetKey(100).to_string(), "+10 Poc");
        assert_eq!(OffsetKey(-333).to_string(), "-33.3 Poc");
        assert_eq!(OffsetKey(66).to_string(), "+6.6 Poc");
    }

    #[test]
    fn intersection_is_strict() {
        let levels = profile(100.0, Timeframe::Medium);
        // +10 rung sits at exactly 110.
        assert!(intersect(&levels, &candle(108.0, 110.0, 107.0, 109.0)).is_none());
        let hit = intersect(&levels, &candle(108.0, 111.0, 107.0, 109.0)).unwrap();
        assert_eq!(hit.offset, OffsetKey(100));
        assert_eq!(hit.rank, 5);
    }

    #[test]
    fn deepest_rung_wins() {
        let levels = profile(100.0, Timeframe::Medium);
        let hit = intersect(&levels, &candle(100.0, 125.0, 99.0, 101.0)).unwrap();
        assert_eq!(hit.offset, OffsetKey(200));
    }

    #[test]
    fn strict_test_ignores_body() {
        let levels = profile(100.0, Timeframe::Medium);
        // Green body 108..112 covers 110; wicks 107..108 and 112..113 do not.
        let body_only = candle(108.0, 113.0, 107.0, 112.0);
        assert!(intersect(&levels, &body_only).is_some());
        assert!(intersect_strict(&levels, &body_only).is_none());

        // Red candle with the rung inside the upper wick.
        let wick = candle(109.0, 111.0, 104.0, 106.0);
        let hit = intersect_strict(&levels, &wick).unwrap();
        assert_eq!(hit.offset, OffsetKey(100));
    }
}
