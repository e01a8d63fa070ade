//! Co-movement of a dependent symbol against each reference segment, and the
//! cross-symbol ranking built from those measurements.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::candle::{Candle, CandleRef};
use crate::error::AnalysisError;
use crate::impulse::ResistanceSegment;
use crate::series::range_by_open_time;
use crate::{abs_percentage_change, timeframe::Timeframe};

/// Stand-in for a zero reference move so ratios stay finite.
const MIN_REFERENCE_CHANGE: f64 = 0.000_000_01;

/// One dependent symbol measured against one reference segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationInfo {
    pub segment_index: usize,
    pub symbol: String,
    pub span_start: DateTime<Utc>,
    pub span_end: DateTime<Utc>,

    pub reference_series_up: bool,
    pub reference_extreme_up: bool,
    pub dependent_series_up: bool,
    pub dependent_extreme_up: bool,

    pub reference_series_change: f64,
    pub reference_extreme_change: f64,
    pub dependent_series_change: f64,
    pub dependent_extreme_change: f64,

    /// Earlier of the segment's two extremes.
    pub reference_first_extreme: CandleRef,
    /// Earlier of the dependent's min/max inside the extreme span.
    pub dependent_first_extreme: CandleRef,
    pub dependent_second_extreme: CandleRef,
}

impl CorrelationInfo {
    pub fn series_multiplier(&self) -> f64 {
        self.dependent_series_change / self.reference_series_change
    }

    pub fn extreme_multiplier(&self) -> f64 {
        self.dependent_extreme_change / self.reference_extreme_change
    }

    pub fn series_agrees(&self) -> bool {
        self.reference_series_up == self.dependent_series_up
    }

    pub fn extreme_agrees(&self) -> bool {
        self.reference_extreme_up == self.dependent_extreme_up
    }

    /// Bars between the reference's first extreme and the dependent's.
    pub fn follow_delay(&self, bar: TimeDelta) -> f64 {
        let gap = self.dependent_first_extreme.open_time - self.reference_first_extreme.open_time;
        (gap.num_milliseconds().abs() as f64) / bar.num_milliseconds() as f64
    }
}

/// Measure `dependent` against one `segment` of `reference`.
///
/// Both series must end on the same bar.
pub fn probe(
    symbol: &str,
    reference: &[Candle],
    dependent: &[Candle],
    segment: &ResistanceSegment,
) -> Result<CorrelationInfo, AnalysisError> {
    let (Some(reference_last), Some(dependent_last)) = (reference.last(), dependent.last()) else {
        return Err(AnalysisError::InsufficientData {
            needed: 1,
            available: 0,
        });
    };
    if reference_last.open_time != dependent_last.open_time {
        return Err(AnalysisError::TimestampMismatch {
            symbol: symbol.to_string(),
            reference: reference_last.open_time,
            dependent: dependent_last.open_time,
        });
    }

    let (start, end) = (segment.first.open_time, segment.last.open_time);
    let reference_span = bounded_range(reference, start, end, "reference series")?;
    let (reference_a, reference_b) = ordered_min_max(reference_span)?;
    let reference_series_change =
        abs_percentage_change(reference_a.close, reference_b.close).max(MIN_REFERENCE_CHANGE);

    let (extreme_a, extreme_b) = (&segment.first_extreme, &segment.second_extreme);
    nonzero(extreme_a)?;
    nonzero(extreme_b)?;
    let reference_extreme_change =
        abs_percentage_change(extreme_a.close, extreme_b.close).max(MIN_REFERENCE_CHANGE);

    let dependent_span = bounded_range(dependent, start, end, "dependent series")?;
    let (dependent_a, dependent_b) = ordered_min_max(dependent_span)?;
    let dependent_series_change = abs_percentage_change(dependent_a.close, dependent_b.close);

    let extreme_span = bounded_range(
        dependent,
        extreme_a.open_time,
        extreme_b.open_time,
        "dependent extreme",
    )?;
    bounded_range(
        reference,
        extreme_a.open_time,
        extreme_b.open_time,
        "reference extreme",
    )?;
    let (dependent_first, dependent_second) = ordered_min_max(extreme_span)?;
    let dependent_extreme_change =
        abs_percentage_change(dependent_first.close, dependent_second.close);

    let reference_first_extreme = if extreme_a.open_time <= extreme_b.open_time {
        *extreme_a
    } else {
        *extreme_b
    };

    Ok(CorrelationInfo {
        segment_index: segment.index,
        symbol: symbol.to_string(),
        span_start: start,
        span_end: end,
        reference_series_up: reference_a.close < reference_b.close,
        reference_extreme_up: extreme_a.close < extreme_b.close,
        dependent_series_up: dependent_a.close < dependent_b.close,
        dependent_extreme_up: dependent_first.close < dependent_second.close,
        reference_series_change,
        reference_extreme_change,
        dependent_series_change,
        dependent_extreme_change,
        reference_first_extreme,
        dependent_first_extreme: dependent_first,
        dependent_second_extreme: dependent_second,
    })
}

fn bounded_range<'a>(
    candles: &'a [Candle],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    what: &'static str,
) -> Result<&'a [Candle], AnalysisError> {
    if start > end {
        return Err(AnalysisError::InvertedRange { what, start, end });
    }
    let range = range_by_open_time(candles, start, end);
    if range.is_empty() {
        return Err(AnalysisError::EmptyRange { what, start, end });
    }
    Ok(range)
}

/// Min and max close of `candles`, earliest first.
fn ordered_min_max(candles: &[Candle]) -> Result<(CandleRef, CandleRef), AnalysisError> {
    let mut min = &candles[0];
    let mut max = &candles[0];
    for candle in &candles[1..] {
        if candle.close < min.close {
            min = candle;
        }
        if candle.close > max.close {
            max = candle;
        }
    }
    let (a, b) = if min.open_time <= max.open_time {
        (min, max)
    } else {
        (max, min)
    };
    if a.close == 0.0 {
        return Err(AnalysisError::ZeroPrice { index: a.index });
    }
    Ok((a.into(), b.into()))
}

fn nonzero(candle: &CandleRef) -> Result<(), AnalysisError> {
    if candle.close == 0.0 {
        return Err(AnalysisError::ZeroPrice {
            index: candle.index,
        });
    }
    Ok(())
}

/// Average follow delay of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowDelay {
    pub symbol: String,
    /// Mean bars between reference and dependent first extremes.
    pub delay: f64,
    /// Segments that qualified for the average.
    pub impulses: usize,
}

/// Ranked correlation lists, rebuilt from scratch every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CorrelationBoard {
    pub max_extreme: Vec<CorrelationInfo>,
    pub min_extreme: Vec<CorrelationInfo>,
    pub max_series: Vec<CorrelationInfo>,
    pub anti_extreme: Vec<CorrelationInfo>,
    pub laggards: Vec<FollowDelay>,
}

impl CorrelationBoard {
    pub const TOP: usize = 5;
    pub const ANTI_TOP: usize = 10;
    pub const LAGGARD_TOP: usize = 20;

    /// Rank every symbol by its newest segment measurement.
    ///
    /// `per_symbol` holds each symbol's measurements in segment order.
    pub fn rank(per_symbol: &[Vec<CorrelationInfo>]) -> Self {
        let mut combined = Vec::new();
        let mut anti = Vec::new();
        for info in per_symbol.iter().filter_map(|infos| infos.last()) {
            match (info.series_agrees(), info.extreme_agrees()) {
                (true, true) => combined.push(info.clone()),
                (true, false) => anti.push(info.clone()),
                _ => {}
            }
        }

        let by_extreme = |a: &CorrelationInfo, b: &CorrelationInfo| {
            a.extreme_multiplier().total_cmp(&b.extreme_multiplier())
        };

        let mut max_extreme = combined.clone();
        max_extreme.sort_by(|a, b| by_extreme(b, a));
        max_extreme.truncate(Self::TOP);

        let mut min_extreme = combined.clone();
        min_extreme.sort_by(by_extreme);
        min_extreme.truncate(Self::TOP);

        let mut max_series = combined;
        max_series.sort_by(|a, b| b.series_multiplier().total_cmp(&a.series_multiplier()));
        max_series.truncate(Self::TOP);

        anti.sort_by(|a, b| by_extreme(b, a));
        anti.truncate(Self::ANTI_TOP);

        Self {
            max_extreme,
            min_extreme,
            max_series,
            anti_extreme: anti,
            laggards: follow_delays(per_symbol, Timeframe::Coarse.duration()),
        }
    }
}

/// Symbols whose extremes lag the reference's, most impulses first, then
/// ordered by delay.
pub fn follow_delays(per_symbol: &[Vec<CorrelationInfo>], bar: TimeDelta) -> Vec<FollowDelay> {
    let mut delays: Vec<FollowDelay> = per_symbol
        .iter()
        .filter_map(|infos| {
            let delays: Vec<f64> = infos
                .iter()
                .filter(|info| info.extreme_agrees())
                .map(|info| info.follow_delay(bar))
                .filter(|&delay| delay > 0.0)
                .collect();
            let symbol = infos.first()?.symbol.clone();
            (!delays.is_empty()).then(|| FollowDelay {
                symbol,
                delay: delays.iter().sum::<f64>() / delays.len() as f64,
                impulses: delays.len(),
            })
        })
        .collect();

    delays.sort_by(|a, b| b.impulses.cmp(&a.impulses));
    delays.truncate(CorrelationBoard::LAGGARD_TOP);
    delays.sort_by(|a, b| b.delay.total_cmp(&a.delay));
    delays
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impulse::segment;
    use crate::series::test_support::series_from_closes;

    /// Reference tops at bar 12 inside a short run (10..=14) and bottoms at bar
    /// 22 inside a long run (20..=24).
    fn reference() -> Vec<Candle> {
        let closes: Vec<f64> = (0..30)
            .map(|i| match i {
                12 => 120.0,
                22 => 80.0,
                _ => 100.0,
            })
            .collect();
        series_from_closes(Timeframe::Coarse, &closes)
            .candles()
            .to_vec()
    }

    fn reference_segment(reference: &[Candle]) -> ResistanceSegment {
        let mut osc = vec![Some(0.0); reference.len()];
        for v in &mut osc[10..=14] {
            *v = Some(8.5);
        }
        for v in &mut osc[20..=24] {
            *v = Some(-8.5);
        }
        let result = segment(reference, &osc, 7.0).unwrap();
        assert_eq!(result.impulses.len(), 2);
        assert_eq!(result.segments.len(), 1);
        result.segments[0].clone()
    }

    fn dependent(f: impl Fn(usize) -> f64) -> Vec<Candle> {
        let closes: Vec<f64> = (0..30).map(f).collect();
        series_from_closes(Timeframe::Coarse, &closes)
            .candles()
            .to_vec()
    }

    #[test]
    fn follower_agrees_at_both_granularities() {
        let reference = reference();
        let seg = reference_segment(&reference);
        // Peaks two bars after the reference, bottoms on the same bar.
        let follower = dependent(|i| match i {
            14 => 60.0,
            22 => 45.0,
            _ => 50.0,
        });
        let info = probe("ETHUSDT", &reference, &follower, &seg).unwrap();
        assert!(!info.reference_series_up);
        assert!(!info.reference_extreme_up);
        assert!(info.series_agrees());
        assert!(info.extreme_agrees());
        assert_eq!(info.dependent_first_extreme.index, 14);
        assert_eq!(info.follow_delay(Timeframe::Coarse.duration()), 2.0);
        assert!((info.reference_extreme_change - 100.0 / 3.0).abs() < 1e-9);
        assert!((info.extreme_multiplier() - 25.0 / (100.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn rising_inside_extreme_span_is_anti_correlated() {
        let reference = reference();
        let seg = reference_segment(&reference);
        // Falls across the whole span but rises strictly between the
        // reference's two extremes.
        let contrarian = dependent(|i| match i {
            10 => 200.0,
            11 => 150.0,
            12..=22 => 100.0 + (i - 12) as f64,
            23 => 60.0,
            _ => 50.0,
        });
        let info = probe("XRPUSDT", &reference, &contrarian, &seg).unwrap();
        assert!(info.series_agrees());
        assert!(!info.extreme_agrees());

        let board = CorrelationBoard::rank(&[vec![info]]);
        assert_eq!(board.anti_extreme.len(), 1);
        assert_eq!(board.anti_extreme[0].symbol, "XRPUSDT");
        assert!(board.max_extreme.is_empty());
    }

    #[test]
    fn trailing_bar_mismatch_is_reported() {
        let reference = reference();
        let seg = reference_segment(&reference);
        let short = dependent(|_| 10.0)[..29].to_vec();
        let err = probe("SOLUSDT", &reference, &short, &seg).unwrap_err();
        assert!(matches!(err, AnalysisError::TimestampMismatch { .. }));
    }

    #[test]
    fn missing_history_is_an_empty_range() {
        let reference = reference();
        let seg = reference_segment(&reference);
        // Listed after the segment ended.
        let young = dependent(|_| 10.0)[25..].to_vec();
        let err = probe("NEWUSDT", &reference, &young, &seg).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::EmptyRange {
                what: "dependent series",
                ..
            }
        ));
    }

    fn info(symbol: &str, extreme: f64, series: f64, agree: (bool, bool), delay_bars: i32) -> CorrelationInfo {
        let base = reference();
        let bar = Timeframe::Coarse.duration();
        let at = |i: usize| CandleRef::from(&base[i]);
        let mut dependent_first = at(10);
        dependent_first.open_time = at(10).open_time + bar * delay_bars;
        CorrelationInfo {
            segment_index: 0,
            symbol: symbol.to_string(),
            span_start: at(10).open_time,
            span_end: at(24).open_time,
            reference_series_up: true,
            reference_extreme_up: true,
            dependent_series_up: agree.0,
            dependent_extreme_up: agree.1,
            reference_series_change: 1.0,
            reference_extreme_change: 1.0,
            dependent_series_change: series,
            dependent_extreme_change: extreme,
            reference_first_extreme: at(10),
            dependent_first_extreme: dependent_first,
            dependent_second_extreme: at(20),
        }
    }

    #[test]
    fn board_orders_by_multipliers() {
        let infos = vec![
            vec![info("A", 3.0, 1.0, (true, true), 0)],
            vec![info("B", 1.0, 5.0, (true, true), 0)],
            vec![info("C", 2.0, 2.0, (true, true), 0)],
            vec![info("D", 9.0, 9.0, (false, true), 0)],
            vec![],
        ];
        let board = CorrelationBoard::rank(&infos);
        let names = |v: &[CorrelationInfo]| v.iter().map(|i| i.symbol.clone()).collect::<Vec<_>>();
        assert_eq!(names(&board.max_extreme), ["A", "C", "B"]);
        assert_eq!(names(&board.min_extreme), ["B", "C", "A"]);
        assert_eq!(names(&board.max_series), ["B", "C", "A"]);
        assert!(board.anti_extreme.is_empty());
    }

    #[test]
    fn laggards_average_qualifying_segments() {
        let per_symbol = vec![
            vec![
                info("SLOW", 1.0, 1.0, (true, true), 4),
                info("SLOW", 1.0, 1.0, (true, true), 2),
                // Disagreeing extreme does not count.
                info("SLOW", 1.0, 1.0, (true, false), 40),
            ],
            vec![info("FAST", 1.0, 1.0, (true, true), 1)],
            // Same-bar extremes never qualify.
            vec![info("SYNC", 1.0, 1.0, (true, true), 0)],
        ];
        let laggards = follow_delays(&per_symbol, Timeframe::Coarse.duration());
        assert_eq!(laggards.len(), 2);
        assert_eq!(laggards[0].symbol, "SLOW");
        assert_eq!(laggards[0].delay, 3.0);
        assert_eq!(laggards[0].impulses, 2);
        assert_eq!(laggards[1].symbol, "FAST");
    }
}
