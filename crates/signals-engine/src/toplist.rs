//! The table of top lists and their HTML rendering.
//!
//! Each list kind is one entry: a name, where it is delivered, whether it is
//! pushed every cycle, a ranking function over the cycle's [`RankingSnapshot`]
//! and a line formatter. Adding a list means adding an entry, nothing else.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use signals_core::correlation::{CorrelationInfo, FollowDelay};
use signals_core::liquidation::{Bias, LiquidationSignal};
use signals_providers::notifier::Target;

use crate::ranking::{Absorption, Inefficiency, RankingSnapshot, TMO_EXTREME};
use crate::universe::Universe;

const LIQUIDATION_TOP: usize = 10;
const POSITION_TOP: usize = 15;
const Z_SCORE_TOP: usize = 10;
const POC_TOP: usize = 20;
const INEFFICIENCY_TOP: usize = 20;
/// TMOx3 signals need a hit at least this deep.
const TMO_X3_MIN_RANK: u8 = 6;

/// Anything a list line is written about.
pub trait Listed {
    fn symbol(&self) -> &str;
}

impl Listed for LiquidationSignal {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Listed for CorrelationInfo {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Listed for FollowDelay {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

/// Display context shared by every line of one rendering pass.
#[derive(Debug, Clone)]
pub struct LineContext {
    pub reference: String,
    pub ranks: HashMap<String, usize>,
    pub tz: Tz,
    pub strict_hits: HashSet<String>,
}

impl LineContext {
    pub fn new(universe: &Universe, tz: Tz, snapshot: &RankingSnapshot) -> Self {
        Self {
            reference: universe.reference().to_string(),
            ranks: universe.ranks(),
            tz,
            strict_hits: snapshot.strict_hits.clone(),
        }
    }

    /// Bold symbol followed by its turnover rank, if known.
    fn name(&self, symbol: &str) -> String {
        match self.ranks.get(symbol) {
            Some(rank) => format!("<b>{symbol}</b> &lt;{rank}&gt;"),
            None => format!("<b>{symbol}</b>"),
        }
    }

    fn time(&self, time: DateTime<Utc>) -> String {
        time.with_timezone(&self.tz).format("%d.%m %H:%M").to_string()
    }
}

pub struct ListKind<T: 'static> {
    pub name: &'static str,
    pub target: Target,
    pub every_cycle: bool,
    pub rank: fn(&RankingSnapshot) -> Vec<T>,
    pub format_line: fn(&T, &LineContext) -> String,
    /// Optional header line(s) below the title.
    pub preamble: Option<fn(&RankingSnapshot) -> String>,
}

/// Object-safe view over every [`ListKind`], whatever its item type.
pub trait TopList: Sync {
    fn name(&self) -> &'static str;
    fn target(&self) -> Target;
    fn every_cycle(&self) -> bool;
    /// Rendered HTML, or `None` when the list has no entries.
    fn render(&self, snapshot: &RankingSnapshot, ctx: &LineContext) -> Option<String>;
}

impl<T: Listed + 'static> TopList for ListKind<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn target(&self) -> Target {
        self.target
    }

    fn every_cycle(&self) -> bool {
        self.every_cycle
    }

    fn render(&self, snapshot: &RankingSnapshot, ctx: &LineContext) -> Option<String> {
        let items = (self.rank)(snapshot);
        if items.is_empty() {
            return None;
        }
        let mut text = format!("📊 <b>{}</b>\n", self.name);
        if let Some(preamble) = self.preamble {
            let _ = writeln!(text, "{}", preamble(snapshot));
        }
        let mut number = 0;
        for item in &items {
            let line = (self.format_line)(item, ctx);
            if item.symbol() == ctx.reference {
                let _ = writeln!(text, "🔸 {line}");
            } else {
                number += 1;
                let _ = writeln!(text, "{number}. {line}");
            }
        }
        Some(text.trim_end().to_string())
    }
}

pub fn empty_list(name: &str) -> String {
    format!("⚠️ List <b>{name}</b> is empty")
}

pub static SIGNAL_LISTS: [ListKind<LiquidationSignal>; 11] = [
    ListKind {
        name: "LongLiquidations",
        target: Target::Group,
        every_cycle: true,
        rank: long_liquidations,
        format_line: liquidation_line,
        preamble: None,
    },
    ListKind {
        name: "ShortLiquidations",
        target: Target::Group,
        every_cycle: true,
        rank: short_liquidations,
        format_line: liquidation_line,
        preamble: None,
    },
    ListKind {
        name: "TopHigh",
        target: Target::Group,
        every_cycle: false,
        rank: top_high,
        format_line: position_line,
        preamble: None,
    },
    ListKind {
        name: "TopLow",
        target: Target::Group,
        every_cycle: false,
        rank: top_low,
        format_line: position_line,
        preamble: None,
    },
    ListKind {
        name: "LongZScore",
        target: Target::Group,
        every_cycle: false,
        rank: long_z_score,
        format_line: z_score_line,
        preamble: None,
    },
    ListKind {
        name: "ShortZScore",
        target: Target::Group,
        every_cycle: false,
        rank: short_z_score,
        format_line: z_score_line,
        preamble: None,
    },
    ListKind {
        name: "HigherPoc",
        target: Target::Group,
        every_cycle: false,
        rank: higher_poc,
        format_line: poc_line,
        preamble: Some(absorption_preamble),
    },
    ListKind {
        name: "LowerPoc",
        target: Target::Group,
        every_cycle: false,
        rank: lower_poc,
        format_line: poc_line,
        preamble: Some(absorption_preamble),
    },
    ListKind {
        name: "LongInefficiency",
        target: Target::Group,
        every_cycle: false,
        rank: long_inefficiency,
        format_line: inefficiency_line,
        preamble: None,
    },
    ListKind {
        name: "ShortInefficiency",
        target: Target::Group,
        every_cycle: false,
        rank: short_inefficiency,
        format_line: inefficiency_line,
        preamble: None,
    },
    ListKind {
        name: "TmoX3Liquidation",
        target: Target::SecondGroup,
        every_cycle: true,
        rank: tmo_x3_liquidations,
        format_line: tmo_x3_line,
        preamble: None,
    },
];

pub static CORRELATION_LISTS: [ListKind<CorrelationInfo>; 4] = [
    ListKind {
        name: "MaxExtreme",
        target: Target::Group,
        every_cycle: false,
        rank: |s| s.board.max_extreme.clone(),
        format_line: correlation_line,
        preamble: Some(segments_preamble),
    },
    ListKind {
        name: "MinExtreme",
        target: Target::Group,
        every_cycle: false,
        rank: |s| s.board.min_extreme.clone(),
        format_line: correlation_line,
        preamble: Some(segments_preamble),
    },
    ListKind {
        name: "MaxSeries",
        target: Target::Group,
        every_cycle: false,
        rank: |s| s.board.max_series.clone(),
        format_line: correlation_line,
        preamble: Some(segments_preamble),
    },
    ListKind {
        name: "AntiExtreme",
        target: Target::Group,
        every_cycle: false,
        rank: |s| s.board.anti_extreme.clone(),
        format_line: correlation_line,
        preamble: Some(segments_preamble),
    },
];

pub static LAGGARDS: ListKind<FollowDelay> = ListKind {
    name: "Laggards",
    target: Target::Group,
    every_cycle: false,
    rank: |s| s.board.laggards.clone(),
    format_line: laggard_line,
    preamble: Some(segments_preamble),
};

/// Every registered list, in publishing order.
pub fn registry() -> Vec<&'static dyn TopList> {
    let mut lists: Vec<&'static dyn TopList> = Vec::new();
    lists.extend(SIGNAL_LISTS.iter().map(|l| l as &dyn TopList));
    lists.extend(CORRELATION_LISTS.iter().map(|l| l as &dyn TopList));
    lists.push(&LAGGARDS);
    lists
}

pub fn find(name: &str) -> Option<&'static dyn TopList> {
    registry()
        .into_iter()
        .find(|list| list.name().eq_ignore_ascii_case(name))
}

/// A rendered message and where it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub name: &'static str,
    pub target: Target,
    pub text: String,
}

/// The per-cycle push: every non-empty `every_cycle` list plus the summary.
pub fn cycle_publications(snapshot: &RankingSnapshot, ctx: &LineContext) -> Vec<Publication> {
    let mut out: Vec<Publication> = registry()
        .into_iter()
        .filter(|list| list.every_cycle())
        .filter_map(|list| {
            Some(Publication {
                name: list.name(),
                target: list.target(),
                text: list.render(snapshot, ctx)?,
            })
        })
        .collect();
    out.push(Publication {
        name: "Summary",
        target: Target::SecondGroup,
        text: summary(snapshot),
    });
    out
}

/// Every list, empty ones included, for on-demand output.
pub fn render_all(snapshot: &RankingSnapshot, ctx: &LineContext) -> Vec<(&'static str, String)> {
    registry()
        .into_iter()
        .map(|list| {
            let text = list
                .render(snapshot, ctx)
                .unwrap_or_else(|| empty_list(list.name()));
            (list.name(), text)
        })
        .collect()
}

// Ranking functions.

fn with_reference_first(
    snapshot: &RankingSnapshot,
    source: &[LiquidationSignal],
    mut ranked: Vec<LiquidationSignal>,
    top: usize,
) -> Vec<LiquidationSignal> {
    ranked.retain(|s| s.symbol != snapshot.reference);
    ranked.truncate(top);
    if let Some(reference) = source.iter().find(|s| s.symbol == snapshot.reference) {
        ranked.insert(0, reference.clone());
    }
    ranked
}

fn liquidations(snapshot: &RankingSnapshot, bias: Bias) -> Vec<LiquidationSignal> {
    let mut items: Vec<LiquidationSignal> = snapshot
        .fine
        .iter()
        .filter(|s| s.hit.is_some() && s.bias == bias)
        .cloned()
        .collect();
    items.sort_by_key(|s| std::cmp::Reverse(s.hit.map(|h| h.rank).unwrap_or_default()));
    items.truncate(LIQUIDATION_TOP);
    items
}

fn long_liquidations(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    liquidations(snapshot, Bias::Short)
}

fn short_liquidations(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    liquidations(snapshot, Bias::Long)
}

fn top_high(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    let mut items = snapshot.fine.clone();
    items.sort_by(|a, b| b.change_ov.total_cmp(&a.change_ov));
    with_reference_first(snapshot, &snapshot.fine, items, POSITION_TOP)
}

fn top_low(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    let mut items = snapshot.fine.clone();
    items.sort_by(|a, b| a.change_ov.total_cmp(&b.change_ov));
    with_reference_first(snapshot, &snapshot.fine, items, POSITION_TOP)
}

fn z_scores(snapshot: &RankingSnapshot, bias: Bias, hit_above: bool) -> Vec<LiquidationSignal> {
    let mut items: Vec<LiquidationSignal> = snapshot
        .fine
        .iter()
        .filter(|s| s.bias == bias && s.z_score.is_some())
        .filter(|s| s.hit.is_none_or(|h| h.offset.is_above() == hit_above))
        .cloned()
        .collect();
    let magnitude = |s: &LiquidationSignal| s.z_score.map(|z| z.value.abs()).unwrap_or_default();
    items.sort_by(|a, b| magnitude(b).total_cmp(&magnitude(a)));
    items.truncate(Z_SCORE_TOP);
    items
}

fn long_z_score(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    z_scores(snapshot, Bias::Short, false)
}

fn short_z_score(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    z_scores(snapshot, Bias::Long, true)
}

fn higher_poc(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    let mut items: Vec<LiquidationSignal> = snapshot
        .fine
        .iter()
        .filter(|s| s.is_above_poc() && (s.hit.is_none() || s.bias == Bias::Long))
        .cloned()
        .collect();
    items.sort_by(|a, b| b.poc_change.total_cmp(&a.poc_change));
    with_reference_first(snapshot, &snapshot.fine, items, POC_TOP)
}

fn lower_poc(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    let mut items: Vec<LiquidationSignal> = snapshot
        .fine
        .iter()
        .filter(|s| !s.is_above_poc() && (s.hit.is_none() || s.bias == Bias::Short))
        .cloned()
        .collect();
    items.sort_by(|a, b| a.poc_change.total_cmp(&b.poc_change));
    with_reference_first(snapshot, &snapshot.fine, items, POC_TOP)
}

fn inefficient(snapshot: &RankingSnapshot, kind: Inefficiency) -> Vec<LiquidationSignal> {
    let mut items: Vec<LiquidationSignal> = snapshot
        .medium
        .iter()
        .filter(|s| snapshot.inefficiency.get(&s.symbol) == Some(&kind))
        .cloned()
        .collect();
    match kind {
        Inefficiency::Oversold => items.sort_by(|a, b| a.poc_change.total_cmp(&b.poc_change)),
        Inefficiency::Overbought => items.sort_by(|a, b| b.poc_change.total_cmp(&a.poc_change)),
    }
    with_reference_first(snapshot, &snapshot.medium, items, INEFFICIENCY_TOP)
}

fn long_inefficiency(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    inefficient(snapshot, Inefficiency::Oversold)
}

fn short_inefficiency(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    inefficient(snapshot, Inefficiency::Overbought)
}

fn tmo_x3_liquidations(snapshot: &RankingSnapshot) -> Vec<LiquidationSignal> {
    let mut items: Vec<LiquidationSignal> = snapshot
        .medium
        .iter()
        .filter(|s| s.hit.is_some_and(|h| h.rank > TMO_X3_MIN_RANK))
        .filter(|s| match (s.bias, s.tmo_x3) {
            (Bias::Long, Some(x3)) => s.is_above_poc() && x3 > TMO_EXTREME,
            (Bias::Short, Some(x3)) => !s.is_above_poc() && x3 < -TMO_EXTREME,
            _ => false,
        })
        .cloned()
        .collect();
    items.sort_by_key(|s| std::cmp::Reverse(s.hit.map(|h| h.rank).unwrap_or_default()));
    items
}

// Line formatters.

fn price(signal: &LiquidationSignal, value: f64) -> String {
    format!("{:.*}", signal.precision, value)
}

fn liquidation_line(signal: &LiquidationSignal, ctx: &LineContext) -> String {
    let mut line = format!("{} {}", ctx.name(&signal.symbol), signal.bias);
    if let Some(hit) = signal.hit {
        let _ = write!(
            line,
            " {} @ {} (rank {}) {}",
            hit.offset,
            price(signal, hit.price),
            hit.rank,
            ctx.time(hit.close_time)
        );
    }
    if ctx.strict_hits.contains(&signal.symbol) {
        line.push_str(" ✅");
    }
    line
}

fn position_line(signal: &LiquidationSignal, ctx: &LineContext) -> String {
    format!("{} {:.1}%", ctx.name(&signal.symbol), signal.change_ov)
}

fn z_score_line(signal: &LiquidationSignal, ctx: &LineContext) -> String {
    let z = signal.z_score.unwrap_or_default();
    format!("{} Z {:+.2}", ctx.name(&signal.symbol), z.value)
}

fn poc_line(signal: &LiquidationSignal, ctx: &LineContext) -> String {
    format!(
        "{} {:+.2}% POC {}",
        ctx.name(&signal.symbol),
        signal.poc_change,
        price(signal, signal.smoothed_poc)
    )
}

fn inefficiency_line(signal: &LiquidationSignal, ctx: &LineContext) -> String {
    let x3 = signal
        .tmo_x3
        .map(|v| format!("{v:+.1}"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "{} {:+.2}% to POC, TMOx3 {x3}",
        ctx.name(&signal.symbol),
        signal.poc_change
    )
}

fn tmo_x3_line(signal: &LiquidationSignal, ctx: &LineContext) -> String {
    format!(
        "{} TMOx3 {:+.1}",
        liquidation_line(signal, ctx),
        signal.tmo_x3.unwrap_or_default()
    )
}

fn correlation_line(info: &CorrelationInfo, ctx: &LineContext) -> String {
    format!(
        "{} extreme {:.2}% vs {:.2}% (x{:.2}), series {:.2}% vs {:.2}% (x{:.2})",
        ctx.name(&info.symbol),
        info.dependent_extreme_change,
        info.reference_extreme_change,
        info.extreme_multiplier(),
        info.dependent_series_change,
        info.reference_series_change,
        info.series_multiplier()
    )
}

fn laggard_line(delay: &FollowDelay, ctx: &LineContext) -> String {
    format!(
        "{} {:.1} bars behind over {} impulses",
        ctx.name(&delay.symbol),
        delay.delay,
        delay.impulses
    )
}

fn absorption_preamble(snapshot: &RankingSnapshot) -> String {
    absorption_report(&snapshot.absorption)
}

fn segments_preamble(snapshot: &RankingSnapshot) -> String {
    format!("Measured against {} reference segments", snapshot.segments)
}

// Reports.

fn flag(on: bool) -> &'static str {
    if on { " ⚠️" } else { "" }
}

pub fn absorption_report(absorption: &Absorption) -> String {
    format!(
        "Above POC: {} ({:.1}%), avg {:.2}%{}\nBelow POC: {} ({:.1}%), avg {:.2}%{}",
        absorption.above,
        absorption.above_share,
        absorption.above_distance,
        flag(absorption.above_distance > Absorption::ABOVE_FLAG),
        absorption.below,
        absorption.below_share,
        absorption.below_distance,
        flag(absorption.below_distance > Absorption::BELOW_FLAG),
    )
}

pub fn tmo_index_report(snapshot: &RankingSnapshot) -> String {
    let index = &snapshot.tmo_index;
    let total = snapshot.total();
    format!(
        "TMO index: {:+.2}{} over {} symbols (30m {:+.2}, 60m {:+.2}, 180m {:+.2})\n\
         Overbought: {} ({:.1}%), oversold: {} ({:.1}%)",
        index.index,
        flag(index.index.abs() > TMO_EXTREME),
        index.symbols,
        index.short_term,
        index.mid_term,
        index.long_term,
        index.overbought,
        index.share(index.overbought, total),
        index.oversold,
        index.share(index.oversold, total),
    )
}

/// Market-wide data report sent with every cycle.
pub fn summary(snapshot: &RankingSnapshot) -> String {
    if snapshot.total() == 0 {
        return "⚠️ Lists are empty".to_string();
    }
    format!(
        "📈 <b>Market data</b>\n{}\n{}",
        tmo_index_report(snapshot),
        absorption_report(&snapshot.absorption)
    )
}
