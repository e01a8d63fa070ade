use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candle::{Candle, CandleRef};
use crate::error::AnalysisError;

/// Bias of a run in the reference oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Oscillator below `-threshold`; the run bottoms out.
    Long,
    /// Oscillator above `+threshold`; the run tops out.
    Short,
}

impl Direction {
    fn classify(value: Option<f64>, threshold: f64) -> Option<Self> {
        match value {
            Some(v) if v > threshold => Some(Direction::Short),
            Some(v) if v < -threshold => Some(Direction::Long),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => f.write_str("long"),
            Direction::Short => f.write_str("short"),
        }
    }
}

/// A maximal run of at least two bars beyond the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impulse {
    pub direction: Direction,
    pub candles: Vec<CandleRef>,
    /// Lowest close of a long run, highest close of a short run.
    pub extremum: CandleRef,
}

impl Impulse {
    fn close(direction: Direction, candles: Vec<CandleRef>) -> Option<Self> {
        if candles.len() < 2 {
            return None;
        }
        let extremum = match direction {
            Direction::Long => first_by(&candles, |a, b| a < b),
            Direction::Short => first_by(&candles, |a, b| a > b),
        }?;
        Some(Self {
            direction,
            candles,
            extremum,
        })
    }

    pub fn first(&self) -> &CandleRef {
        &self.candles[0]
    }

    pub fn last(&self) -> &CandleRef {
        &self.candles[self.candles.len() - 1]
    }
}

/// First candle whose close beats every other under `better`.
fn first_by(candles: &[CandleRef], better: impl Fn(f64, f64) -> bool) -> Option<CandleRef> {
    let mut best = *candles.first()?;
    for candle in &candles[1..] {
        if better(candle.close, best.close) {
            best = *candle;
        }
    }
    Some(best)
}

/// Two time-adjacent impulses reduced to their span and extrema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResistanceSegment {
    /// Emission order.
    pub index: usize,
    /// Direction of the earlier impulse.
    pub direction: Direction,
    /// True when split out of a same-direction pair.
    pub doubled: bool,
    pub first: CandleRef,
    pub last: CandleRef,
    pub first_extreme: CandleRef,
    pub second_extreme: CandleRef,
}

#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub impulses: Vec<Impulse>,
    pub segments: Vec<ResistanceSegment>,
}

/// Split the reference series into impulses and pair them into segments.
///
/// `oscillator[i]` belongs to `candles[i]`; `None` is treated as neutral.
pub fn segment(
    candles: &[Candle],
    oscillator: &[Option<f64>],
    threshold: f64,
) -> Result<Segmentation, AnalysisError> {
    if candles.len() != oscillator.len() {
        return Err(AnalysisError::InvalidData(format!(
            "{} oscillator values for {} candles",
            oscillator.len(),
            candles.len()
        )));
    }

    let impulses = find_impulses(candles, oscillator, threshold);
    let mut segments = Vec::new();
    for pair in impulses.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        if current.direction == next.direction {
            let (a, b) = double(candles, current, next)?;
            segments.push(a);
            segments.push(b);
        } else {
            segments.push(ResistanceSegment {
                index: 0,
                direction: current.direction,
                doubled: false,
                first: *current.first(),
                last: *next.last(),
                first_extreme: current.extremum,
                second_extreme: next.extremum,
            });
        }
    }

    let before = segments.len();
    segments.retain(|s| {
        s.first.index != s.last.index && s.first_extreme.index != s.second_extreme.index
    });
    for (i, s) in segments.iter_mut().enumerate() {
        s.index = i;
    }
    debug!(
        impulses = impulses.len(),
        segments = segments.len(),
        discarded = before - segments.len(),
        "Segmented reference series"
    );
    Ok(Segmentation { impulses, segments })
}

fn find_impulses(candles: &[Candle], oscillator: &[Option<f64>], threshold: f64) -> Vec<Impulse> {
    let mut impulses = Vec::new();
    let mut open: Option<(Direction, Vec<CandleRef>)> = None;

    for (candle, &value) in candles.iter().zip(oscillator) {
        let direction = Direction::classify(value, threshold);
        if let (Some((current, run)), Some(d)) = (open.as_mut(), direction)
            && *current == d
        {
            run.push(candle.into());
            continue;
        }
        if let Some((d, run)) = open.take() {
            impulses.extend(Impulse::close(d, run));
        }
        open = direction.map(|d| (d, vec![CandleRef::from(candle)]));
    }
    if let Some((d, run)) = open {
        impulses.extend(Impulse::close(d, run));
    }
    impulses
}

/// Split a same-direction pair at the mediate extremum between their own extrema:
/// the lowest close after a short run, the highest after a long one.
fn double(
    candles: &[Candle],
    current: &Impulse,
    next: &Impulse,
) -> Result<(ResistanceSegment, ResistanceSegment), AnalysisError> {
    let (from, to) = (current.extremum.index, next.extremum.index);
    if from > to || to >= candles.len() {
        return Err(AnalysisError::OutOfBounds {
            index: to.max(from),
            len: candles.len(),
        });
    }
    let between: Vec<CandleRef> = candles[from..=to].iter().map(CandleRef::from).collect();
    let mediate = match current.direction {
        Direction::Short => first_by(&between, |a, b| a < b),
        Direction::Long => first_by(&between, |a, b| a > b),
    }
    .ok_or(AnalysisError::OutOfBounds {
        index: from,
        len: candles.len(),
    })?;

    Ok((
        ResistanceSegment {
            index: 0,
            direction: current.direction,
            doubled: true,
            first: *current.first(),
            last: mediate,
            first_extreme: current.extremum,
            second_extreme: mediate,
        },
        ResistanceSegment {
            index: 0,
            direction: next.direction,
            doubled: true,
            first: mediate,
            last: *next.last(),
            first_extreme: mediate,
            second_extreme: next.extremum,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_support::series_from_closes;
    use crate::timeframe::Timeframe;

    fn oscillator(len: usize, runs: &[(usize, usize, f64)]) -> Vec<Option<f64>> {
        let mut values = vec![Some(0.0); len];
        for &(start, end, value) in runs {
            for v in &mut values[start..=end] {
                *v = Some(value);
            }
        }
        values
    }

    #[test]
    fn single_bar_run_is_discarded() {
        let series = series_from_closes(Timeframe::Coarse, &[100.0; 10]);
        let osc = oscillator(10, &[(4, 4, 9.0)]);
        let result = segment(series.candles(), &osc, 7.0).unwrap();
        assert!(result.impulses.is_empty());
    }

    #[test]
    fn two_bar_run_is_one_impulse() {
        let series = series_from_closes(Timeframe::Coarse, &[100.0; 10]);
        let osc = oscillator(10, &[(4, 5, -9.0)]);
        let result = segment(series.candles(), &osc, 7.0).unwrap();
        assert_eq!(result.impulses.len(), 1);
        assert_eq!(result.impulses[0].direction, Direction::Long);
        assert_eq!(result.impulses[0].candles.len(), 2);
    }

    #[test]
    fn flip_closes_run_without_carrying_it() {
        let series = series_from_closes(Timeframe::Coarse, &[100.0; 10]);
        // One long bar, then three short bars, then one long bar at the end.
        let osc = oscillator(10, &[(2, 2, -9.0), (3, 5, 9.0), (9, 9, -9.0)]);
        let result = segment(series.candles(), &osc, 7.0).unwrap();
        assert_eq!(result.impulses.len(), 1);
        assert_eq!(result.impulses[0].first().index, 3);
        assert_eq!(result.impulses[0].last().index, 5);
    }

    #[test]
    fn warmup_values_are_neutral() {
        let series = series_from_closes(Timeframe::Coarse, &[100.0; 6]);
        let mut osc = vec![None; 6];
        osc[4] = Some(9.0);
        osc[5] = Some(9.0);
        let result = segment(series.candles(), &osc, 7.0).unwrap();
        assert_eq!(result.impulses.len(), 1);
    }

    #[test]
    fn short_run_extremum_is_max_close() {
        let closes: Vec<f64> = (0..20)
            .map(|i| match i {
                10 => 101.0,
                11 => 105.0,
                12 => 103.0,
                13 => 104.0,
                14 => 102.0,
                _ => 100.0,
            })
            .collect();
        let series = series_from_closes(Timeframe::Coarse, &closes);
        let osc = oscillator(20, &[(10, 14, 8.5)]);
        let result = segment(series.candles(), &osc, 7.0).unwrap();
        assert_eq!(result.impulses.len(), 1);
        let impulse = &result.impulses[0];
        assert_eq!(impulse.direction, Direction::Short);
        assert_eq!((impulse.first().index, impulse.last().index), (10, 14));
        assert_eq!(impulse.extremum.index, 11);
        assert_eq!(impulse.extremum.close, 105.0);
        assert!(result.segments.is_empty());
    }

    #[test]
    fn opposite_pair_spans_both_runs() {
        let mut closes = vec![100.0; 30];
        closes[12] = 110.0;
        closes[22] = 90.0;
        let series = series_from_closes(Timeframe::Coarse, &closes);
        let osc = oscillator(30, &[(10, 14, 9.0), (20, 24, -9.0)]);
        let result = segment(series.candles(), &osc, 7.0).unwrap();

        assert_eq!(result.segments.len(), 1);
        let s = &result.segments[0];
        assert!(!s.doubled);
        assert_eq!(s.direction, Direction::Short);
        assert_eq!((s.first.index, s.last.index), (10, 24));
        assert_eq!((s.first_extreme.index, s.second_extreme.index), (12, 22));
    }

    #[test]
    fn same_direction_pair_is_split_at_mediate_low() {
        let mut closes = vec![100.0; 30];
        closes[6] = 120.0;
        closes[11] = 80.0;
        closes[18] = 115.0;
        let series = series_from_closes(Timeframe::Coarse, &closes);
        let osc = oscillator(30, &[(5, 7, 9.0), (17, 19, 9.0)]);
        let result = segment(series.candles(), &osc, 7.0).unwrap();

        assert_eq!(result.segments.len(), 2);
        let (a, b) = (&result.segments[0], &result.segments[1]);
        assert!(a.doubled && b.doubled);
        assert_eq!((a.index, b.index), (0, 1));
        assert_eq!((a.first_extreme.index, a.second_extreme.index), (6, 11));
        assert_eq!((a.first.index, a.last.index), (5, 11));
        assert_eq!((b.first_extreme.index, b.second_extreme.index), (11, 18));
        assert_eq!((b.first.index, b.last.index), (11, 19));
    }

    #[test]
    fn degenerate_split_is_discarded() {
        // Nothing between the two lows closes above the first low, so the
        // mediate high of the long-long pair is the first low itself.
        let mut closes = vec![100.0; 20];
        closes[3] = 90.0;
        closes[4] = 89.0;
        for close in &mut closes[5..=10] {
            *close = 85.0;
        }
        closes[11] = 80.0;
        closes[12] = 85.0;
        let series = series_from_closes(Timeframe::Coarse, &closes);
        let osc = oscillator(20, &[(3, 4, -9.0), (11, 12, -9.0)]);
        let result = segment(series.candles(), &osc, 7.0).unwrap();

        assert_eq!(result.segments.len(), 1);
        let s = &result.segments[0];
        assert_eq!(s.index, 0);
        assert_eq!((s.first_extreme.index, s.second_extreme.index), (4, 11));
        assert_eq!((s.first.index, s.last.index), (4, 12));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let series = series_from_closes(Timeframe::Coarse, &[100.0; 3]);
        assert!(segment(series.candles(), &[None, None], 7.0).is_err());
    }
}
