//! Cross-symbol aggregation run once per cycle, after every unit has computed.

use std::collections::{HashMap, HashSet};
use std::iter::Sum;

use serde::Serialize;
use signals_core::abs_percentage_change;
use signals_core::correlation::{CorrelationBoard, CorrelationInfo};
use signals_core::indicators::TmoValues;
use signals_core::liquidation::{LiquidationSignal, SignalSet};

/// TMO magnitude treated as overbought/oversold.
pub const TMO_EXTREME: f64 = 8.0;

/// What one unit contributes to the ranking pass.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub symbol: String,
    pub signals: SignalSet,
    /// Readings on the newest medium bar.
    pub tmo: TmoValues,
    pub medium_close: f64,
    pub inefficiency: Option<Inefficiency>,
    pub correlations: Vec<CorrelationInfo>,
}

/// The current TMO180 run outlasts the symbol's average run on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Inefficiency {
    /// Above `+TMO_EXTREME`.
    Overbought,
    /// Below `-TMO_EXTREME`.
    Oversold,
}

#[derive(Debug, Default)]
struct RunStats {
    runs: usize,
    bars: usize,
    current: usize,
}

impl RunStats {
    fn push(&mut self, inside: bool) {
        if inside {
            self.current += 1;
        } else {
            self.close();
        }
    }

    fn close(&mut self) {
        if self.current >= 2 {
            self.runs += 1;
            self.bars += self.current;
        }
        self.current = 0;
    }

    fn average(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.bars as f64 / self.runs as f64
        }
    }
}

/// Scan a TMO180 history (oldest first). Missing readings are skipped.
pub fn detect_inefficiency(tmo180: &[Option<f64>]) -> Option<Inefficiency> {
    let mut high = RunStats::default();
    let mut low = RunStats::default();
    for value in tmo180.iter().flatten() {
        high.push(*value > TMO_EXTREME);
        low.push(*value < -TMO_EXTREME);
    }
    let (current_high, current_low) = (high.current, low.current);
    high.close();
    low.close();

    let last = (*tmo180.last()?)?;
    if last > TMO_EXTREME && current_high as f64 > high.average() {
        Some(Inefficiency::Overbought)
    } else if last < -TMO_EXTREME && current_low as f64 > low.average() {
        Some(Inefficiency::Oversold)
    } else {
        None
    }
}

/// Partial TMO sums from one slice of units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TmoPartial {
    sum30: f64,
    sum60: f64,
    sum180: f64,
    count: usize,
}

impl TmoPartial {
    pub fn of(tmo: &TmoValues) -> Self {
        match (tmo.tmo30, tmo.tmo60, tmo.tmo180) {
            (Some(sum30), Some(sum60), Some(sum180)) => Self {
                sum30,
                sum60,
                sum180,
                count: 1,
            },
            _ => Self::default(),
        }
    }
}

impl Sum for TmoPartial {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, p| Self {
            sum30: acc.sum30 + p.sum30,
            sum60: acc.sum60 + p.sum60,
            sum180: acc.sum180 + p.sum180,
            count: acc.count + p.count,
        })
    }
}

/// Market-wide TMO averages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TmoIndex {
    pub short_term: f64,
    pub mid_term: f64,
    pub long_term: f64,
    /// Mean of the three terms.
    pub index: f64,
    pub symbols: usize,
    pub overbought: usize,
    pub oversold: usize,
}

impl TmoIndex {
    fn from_partial(total: TmoPartial) -> Self {
        if total.count == 0 {
            return Self::default();
        }
        let n = total.count as f64;
        let (short_term, mid_term, long_term) = (total.sum30 / n, total.sum60 / n, total.sum180 / n);
        Self {
            short_term,
            mid_term,
            long_term,
            index: (short_term + mid_term + long_term) / 3.0,
            symbols: total.count,
            ..Default::default()
        }
    }

    pub fn share(&self, count: usize, total: usize) -> f64 {
        if total == 0 { 0.0 } else { count as f64 / total as f64 * 100.0 }
    }
}

/// How many symbols trade above/below their medium POC and how far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Absorption {
    pub above: usize,
    pub below: usize,
    pub above_share: f64,
    pub below_share: f64,
    /// Mean absolute distance to POC, %.
    pub above_distance: f64,
    pub below_distance: f64,
}

impl Absorption {
    pub const ABOVE_FLAG: f64 = 4.0;
    pub const BELOW_FLAG: f64 = 5.0;

    fn measure(reports: &[UnitReport]) -> Self {
        let mut above = (0usize, 0.0);
        let mut below = (0usize, 0.0);
        for report in reports {
            let poc = report.signals.medium.smoothed_poc;
            let distance = abs_percentage_change(poc, report.medium_close);
            if report.medium_close > poc {
                above = (above.0 + 1, above.1 + distance);
            } else {
                below = (below.0 + 1, below.1 + distance);
            }
        }
        let total = reports.len();
        let share = |n: usize| if total > 0 { n as f64 / total as f64 * 100.0 } else { 0.0 };
        let mean = |(n, sum): (usize, f64)| if n > 0 { sum / n as f64 } else { 0.0 };
        Self {
            above: above.0,
            below: below.0,
            above_share: share(above.0),
            below_share: share(below.0),
            above_distance: mean(above),
            below_distance: mean(below),
        }
    }
}

/// Everything the top lists draw from, rebuilt from scratch each cycle.
#[derive(Debug, Clone, Default)]
pub struct RankingSnapshot {
    pub reference: String,
    pub medium: Vec<LiquidationSignal>,
    pub fine: Vec<LiquidationSignal>,
    /// Symbols whose fine bar also passed the body-restricted test.
    pub strict_hits: HashSet<String>,
    pub tmo: HashMap<String, TmoValues>,
    pub inefficiency: HashMap<String, Inefficiency>,
    pub tmo_index: TmoIndex,
    pub absorption: Absorption,
    pub board: CorrelationBoard,
    /// Reference segments the correlations were measured against.
    pub segments: usize,
}

impl RankingSnapshot {
    pub fn build(reference: &str, reports: &[UnitReport], segments: usize) -> Self {
        // Fan-out per unit, fan-in by summing.
        let partial: TmoPartial = reports.iter().map(|r| TmoPartial::of(&r.tmo)).sum();
        let mut tmo_index = TmoIndex::from_partial(partial);

        let inefficiency: HashMap<String, Inefficiency> = reports
            .iter()
            .filter_map(|r| Some((r.symbol.clone(), r.inefficiency?)))
            .collect();
        tmo_index.overbought = inefficiency
            .values()
            .filter(|&&i| i == Inefficiency::Overbought)
            .count();
        tmo_index.oversold = inefficiency.len() - tmo_index.overbought;

        let correlations: Vec<Vec<CorrelationInfo>> = reports
            .iter()
            .filter(|r| r.symbol != reference && !r.correlations.is_empty())
            .map(|r| r.correlations.clone())
            .collect();

        Self {
            reference: reference.to_string(),
            medium: reports.iter().map(|r| r.signals.medium.clone()).collect(),
            fine: reports.iter().map(|r| r.signals.fine.clone()).collect(),
            strict_hits: reports
                .iter()
                .filter(|r| r.signals.strict_fine.hit.is_some())
                .map(|r| r.symbol.clone())
                .collect(),
            tmo: reports.iter().map(|r| (r.symbol.clone(), r.tmo)).collect(),
            inefficiency,
            tmo_index,
            absorption: Absorption::measure(reports),
            board: CorrelationBoard::rank(&correlations),
            segments,
        }
    }

    pub fn total(&self) -> usize {
        self.fine.len()
    }

    /// Move the reference symbol's entry, if present, to the front.
    pub fn pin_reference(&self, items: &mut Vec<LiquidationSignal>) {
        if let Some(pos) = items.iter().position(|s| s.symbol == self.reference) {
            let reference = items.remove(pos);
            items.insert(0, reference);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{TimeZone, Utc};
    use signals_core::ladder::OffsetKey;
    use signals_core::liquidation::{Bias, LiquidationHit, SignalSource};

    pub fn signal(symbol: &str, bias: Bias, poc_change: f64) -> LiquidationSignal {
        LiquidationSignal {
            symbol: symbol.to_string(),
            source: SignalSource::Fine,
            hit: None,
            bias,
            smoothed_poc: 100.0,
            poc_change,
            change_ov: 50.0,
            tmo30: Some(1.0),
            tmo_x3: Some(1.0),
            z_score: None,
            precision: 2,
        }
    }

    pub fn hit(offset: i16, rank: u8) -> Option<LiquidationHit> {
        Some(LiquidationHit {
            price: 100.0 * (1.0 + offset as f64 / 1000.0),
            offset: OffsetKey(offset),
            rank,
            close_time: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        })
    }

    pub fn report(symbol: &str, fine: LiquidationSignal, medium_close: f64) -> UnitReport {
        let medium = LiquidationSignal {
            source: SignalSource::Medium,
            ..fine.clone()
        };
        UnitReport {
            symbol: symbol.to_string(),
            signals: SignalSet {
                medium: medium.clone(),
                fine,
                strict_fine: LiquidationSignal {
                    source: SignalSource::StrictFine,
                    hit: None,
                    ..medium
                },
            },
            tmo: TmoValues::default(),
            medium_close,
            inefficiency: None,
            correlations: Vec::new(),
        }
    }
}
