use chrono::{DateTime, Utc};

use crate::candle::Candle;
use crate::error::AnalysisError;
use crate::timeframe::Timeframe;

/// Append-only, time-ordered candles for one (symbol, timeframe) pair.
///
/// Invariant: `candles[i].close_time <= candles[i + 1].open_time` and
/// `candles[i].index == i`.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl PriceSeries {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            candles: Vec::new(),
        }
    }

    /// Build a series from fetched candles, re-indexing them by position.
    pub fn from_candles(
        timeframe: Timeframe,
        mut candles: Vec<Candle>,
    ) -> Result<Self, AnalysisError> {
        for i in 1..candles.len() {
            if candles[i].open_time < candles[i - 1].close_time {
                return Err(AnalysisError::OutOfOrder {
                    open_time: candles[i].open_time,
                    last_close: candles[i - 1].close_time,
                });
            }
        }
        for (i, candle) in candles.iter_mut().enumerate() {
            candle.index = i;
        }
        Ok(Self { timeframe, candles })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn candles_mut(&mut self) -> &mut [Candle] {
        &mut self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Candle> {
        self.candles.last_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    /// Append `candle` if it opens strictly after the last close.
    /// Returns `false` (and leaves the series untouched) otherwise.
    pub fn append(&mut self, mut candle: Candle) -> bool {
        if let Some(last) = self.candles.last()
            && candle.open_time <= last.close_time
        {
            return false;
        }
        candle.index = self.candles.len();
        self.candles.push(candle);
        true
    }

    /// Candles whose open time lies in `[start, end]`.
    pub fn range_by_open_time(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Candle] {
        range_by_open_time(&self.candles, start, end)
    }

    /// True once the newest bar is at least one bar interval old (or there is none).
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.candles.last() {
            Some(last) => now - last.close_time >= self.timeframe.duration(),
            None => true,
        }
    }
}

/// Candles whose open time lies in `[start, end]`, for any time-ordered slice.
pub fn range_by_open_time(
    candles: &[Candle],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> &[Candle] {
    let from = candles.partition_point(|c| c.open_time < start);
    let to = candles.partition_point(|c| c.open_time <= end);
    if from >= to { &[] } else { &candles[from..to] }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeDelta, TimeZone, Utc};

    use crate::candle::Candle;
    use crate::series::PriceSeries;
    use crate::timeframe::Timeframe;

    /// Series with one flat candle per close price, starting 2025-01-01 00:00 UTC.
    pub fn series_from_closes(timeframe: Timeframe, closes: &[f64]) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let bar = timeframe.duration();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                index: i,
                open_time: start + bar * i as i32,
                close_time: start + bar * (i as i32 + 1) - TimeDelta::milliseconds(1),
                open: close,
                high: close * 1.001,
                low: close * 0.999,
                close,
                volume: 10.0,
                ..Default::default()
            })
            .collect();
        PriceSeries::from_candles(timeframe, candles).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::series_from_closes;
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn append_requires_strictly_newer_open() {
        let mut series = series_from_closes(Timeframe::Fine, &[1.0, 2.0, 3.0]);
        let last = series.last().unwrap().clone();

        let mut stale = last.clone();
        stale.close = 99.0;
        assert!(!series.append(stale));
        assert_eq!(series.len(), 3);

        let mut next = last.clone();
        next.open_time = last.close_time + TimeDelta::milliseconds(1);
        next.close_time = next.open_time + TimeDelta::minutes(5);
        next.index = 0;
        assert!(series.append(next));
        assert_eq!(series.len(), 4);
        assert_eq!(series.last().unwrap().index, 3);
    }

    #[test]
    fn from_candles_rejects_overlap() {
        let series = series_from_closes(Timeframe::Fine, &[1.0, 2.0]);
        let mut candles = series.candles().to_vec();
        candles[1].open_time = candles[0].open_time;
        let err = PriceSeries::from_candles(Timeframe::Fine, candles).unwrap_err();
        assert!(matches!(err, AnalysisError::OutOfOrder { .. }));
    }

    #[test]
    fn range_by_open_time_is_inclusive() {
        let series = series_from_closes(Timeframe::Fine, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let c = series.candles();
        let range = series.range_by_open_time(c[1].open_time, c[3].open_time);
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].index, 1);
        assert_eq!(range[2].index, 3);
        assert!(
            series
                .range_by_open_time(c[3].open_time, c[1].open_time)
                .is_empty()
        );
    }

    #[test]
    fn staleness_tracks_bar_interval() {
        let series = series_from_closes(Timeframe::Fine, &[1.0]);
        let close = series.last().unwrap().close_time;
        assert!(!series.is_stale(close + TimeDelta::minutes(4)));
        assert!(series.is_stale(close + TimeDelta::minutes(5)));
        assert!(PriceSeries::new(Timeframe::Fine).is_stale(close));
    }
}
