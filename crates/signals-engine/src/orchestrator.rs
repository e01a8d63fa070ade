//! The long-running loop: ranks the universe, drives every unit through
//! ingest, update and compute in bounded batches, publishes the top lists and
//! rebuilds everything at each UTC midnight.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use serde::Serialize;
use signals_core::volume_profile::ProfileConfig;
use signals_providers::notifier::{Notifier, Target};
use signals_providers::provider::{MarketDataProvider, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ranking::{RankingSnapshot, UnitReport};
use crate::toplist::{self, LineContext};
use crate::unit::{Component, DeactivationCause, Operation, SymbolAnalysisUnit, UnitSettings};
use crate::universe::Universe;

/// One unit that stopped on an unhandled error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fault {
    pub symbol: String,
    pub component: Component,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub healthy: usize,
    pub total: usize,
    pub faults: Vec<Fault>,
}

impl Health {
    /// Status line plus one line per faulted unit.
    pub fn admin_report(&self) -> String {
        let mut text = self.to_string();
        for fault in &self.faults {
            text.push_str(&format!(
                "\n{} ({}): {}",
                fault.symbol, fault.component, fault.message
            ));
        }
        text
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} units healthy", self.healthy, self.total)
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    tz: Tz,
    universe: Arc<Universe>,
    provider: Arc<dyn MarketDataProvider>,
    notifier: Arc<dyn Notifier>,
    units: Vec<SymbolAnalysisUnit>,
    last_ranking: Option<RankingSnapshot>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        universe: Arc<Universe>,
        provider: Arc<dyn MarketDataProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        let tz = config.time_zone()?;
        Ok(Self {
            config,
            tz,
            universe,
            provider,
            notifier,
            units: Vec::new(),
            last_ranking: None,
        })
    }

    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    pub fn units(&self) -> &[SymbolAnalysisUnit] {
        &self.units
    }

    pub fn last_ranking(&self) -> Option<&RankingSnapshot> {
        self.last_ranking.as_ref()
    }

    fn settings(&self) -> UnitSettings {
        UnitSettings {
            limits: self.config.history,
            reference_threshold: self.config.reference_threshold,
            profile: ProfileConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Load the tradable universe from the provider.
    pub async fn bootstrap(&mut self) -> Result<(), EngineError> {
        let symbols = self.provider.fetch_tradable_symbols().await?;
        info!(
            provider = self.provider.name(),
            symbols = symbols.len(),
            "Loaded tradable symbols"
        );
        self.universe.set_symbols(symbols);
        Ok(())
    }

    /// Fresh, uninitialized units for every symbol in the universe.
    pub fn build_units(&mut self) {
        let settings = self.settings();
        self.units = self
            .universe
            .symbols()
            .into_iter()
            .map(|symbol| {
                SymbolAnalysisUnit::new(
                    symbol,
                    self.universe.clone(),
                    self.provider.clone(),
                    self.notifier.clone(),
                    settings,
                )
            })
            .collect();
        self.last_ranking = None;
        debug!(units = self.units.len(), "Built analysis units");
    }

    /// Rank tracked symbols by 24h turnover; park everything outside the top N.
    pub async fn refresh_ranking(&mut self) -> Result<(), EngineError> {
        let mut turnover = self.provider.fetch_turnover().await?;
        let tracked: HashSet<String> = self.universe.symbols().into_iter().collect();
        turnover.retain(|t| tracked.contains(&t.symbol));
        turnover.sort_by(|a, b| b.quote_volume.cmp(&a.quote_volume));

        let ordered: Vec<String> = turnover.into_iter().map(|t| t.symbol).collect();
        self.universe.set_ranks(&ordered);
        let top: HashSet<&str> = ordered
            .iter()
            .take(self.config.top_n)
            .map(String::as_str)
            .collect();
        for unit in &mut self.units {
            unit.apply_ranking(top.contains(unit.symbol()));
        }
        debug!(ranked = ordered.len(), top_n = self.config.top_n, "Refreshed turnover ranking");
        Ok(())
    }

    /// Run `operation` on every active unit: the reference alone first, then
    /// the rest in sequential batches of concurrent units.
    pub async fn process(&mut self, operation: Operation) {
        let batch = self.config.request_batch_size.max(1);
        let (reference, mut others) = split_active(&mut self.units, &self.universe);
        let total = reference.len() + others.len();
        let mut done = 0;
        for unit in reference {
            unit.run(operation).await;
            done += 1;
        }
        for chunk in others.chunks_mut(batch) {
            join_all(chunk.iter_mut().map(|unit| unit.run(operation))).await;
            done += chunk.len();
            info!("[{operation}] processed {done} of {total} symbols");
        }
    }

    /// Compute every active unit in sequential batches.
    pub async fn compute_all(&mut self) {
        let batch = self.config.compute_batch_size.max(1);
        let (reference, mut others) = split_active(&mut self.units, &self.universe);
        let total = reference.len() + others.len();
        let mut done = 0;
        for unit in reference {
            unit.compute().await;
            done += 1;
        }
        for chunk in others.chunks_mut(batch) {
            join_all(chunk.iter_mut().map(|unit| unit.compute())).await;
            done += chunk.len();
            info!("[compute] processed {done} of {total} symbols");
        }
    }

    /// Aggregate every active unit's latest signals.
    pub fn rank(&mut self) -> &RankingSnapshot {
        let reports: Vec<UnitReport> = self
            .units
            .iter()
            .filter(|unit| is_active(unit, &self.universe))
            .filter_map(SymbolAnalysisUnit::report)
            .collect();
        let segments = self.universe.reference_snapshot().segmentation.segments.len();
        self.last_ranking
            .insert(RankingSnapshot::build(self.universe.reference(), &reports, segments))
    }

    pub fn line_context(&self, snapshot: &RankingSnapshot) -> LineContext {
        LineContext::new(&self.universe, self.tz, snapshot)
    }

    async fn publish(&self) {
        let Some(snapshot) = &self.last_ranking else {
            return;
        };
        let ctx = self.line_context(snapshot);
        for publication in toplist::cycle_publications(snapshot, &ctx) {
            if let Err(e) = self.notifier.send(publication.target, &publication.text).await {
                warn!(list = publication.name, target = %publication.target, error = %e, "Publish failed");
            }
        }
    }

    /// One fetch pass followed by compute, ranking and publishing.
    pub async fn cycle(&mut self, operation: Operation) {
        if let Err(e) = self.refresh_ranking().await {
            warn!(error = %e, "Turnover ranking failed, keeping previous ranks");
        }
        self.process(operation).await;
        self.compute_all().await;
        self.rank();
        self.publish().await;
        info!(health = %self.health(), "Cycle complete");
    }

    /// True when every active unit has a stale fine series.
    fn all_due(&self, now: DateTime<Utc>) -> bool {
        let mut active = self
            .units
            .iter()
            .filter(|unit| is_active(unit, &self.universe))
            .peekable();
        active.peek().is_some() && active.all(|unit| unit.time_to_update(now))
    }

    /// Ingest once, then poll for updates until `token` is cancelled. The
    /// running cycle always finishes first.
    pub async fn run_day(&mut self, token: CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        self.cycle(Operation::Ingest).await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
            if self.all_due(Utc::now()) {
                self.cycle(Operation::Update).await;
            }
        }
        info!("Daily run stopped");
    }

    /// Daily loop until `root` is cancelled.
    pub async fn run(&mut self, root: CancellationToken) -> Result<(), EngineError> {
        self.bootstrap().await?;
        loop {
            self.prune().await;
            self.universe.clear_reference();
            self.build_units();

            let day = root.child_token();
            let cutover = until_utc_midnight(Utc::now());
            info!(hours = cutover.as_secs() / 3600, "Starting daily run");
            {
                let run = self.run_day(day.clone());
                tokio::pin!(run);
                let timed_out = tokio::select! {
                    _ = &mut run => false,
                    _ = tokio::time::sleep(cutover) => true,
                };
                if timed_out {
                    info!("Daily cutover reached");
                    day.cancel();
                    run.await;
                }
            }

            if let Err(e) = self.universe.save_preferences() {
                warn!(error = %e, "Saving preferences failed");
            }
            let health = self.health();
            self.notify_admins(&health.admin_report()).await;

            if root.is_cancelled() {
                info!("Shutting down");
                return Ok(());
            }
        }
    }

    /// Ingest, compute and rank once without publishing.
    pub async fn once(&mut self) -> Result<&RankingSnapshot, EngineError> {
        self.bootstrap().await?;
        self.build_units();
        self.refresh_ranking().await?;
        self.process(Operation::Ingest).await;
        self.compute_all().await;
        Ok(self.rank())
    }

    /// Drop symbols that failed or were delisted since the last rebuild.
    pub async fn prune(&mut self) {
        let dropped: Vec<String> = self
            .units
            .iter()
            .filter(|unit| {
                matches!(
                    unit.cause(),
                    DeactivationCause::TransientError | DeactivationCause::Delisted
                ) && !unit.is_reference()
            })
            .map(|unit| unit.symbol().to_string())
            .collect();
        if dropped.is_empty() {
            return;
        }
        self.universe.remove(&dropped);
        info!(count = dropped.len(), "Pruned failed and delisted symbols");
        self.notify_admins(&format!("Removed from tracking: {}", dropped.join(", ")))
            .await;
    }

    pub fn health(&self) -> Health {
        let faults: Vec<Fault> = self
            .units
            .iter()
            .filter(|unit| unit.cause() == DeactivationCause::TransientError)
            .filter_map(|unit| {
                let fault = unit.fault()?;
                Some(Fault {
                    symbol: unit.symbol().to_string(),
                    component: fault.component,
                    message: fault.message.clone(),
                })
            })
            .collect();
        let unhealthy = self
            .units
            .iter()
            .filter(|unit| {
                matches!(
                    unit.cause(),
                    DeactivationCause::TransientError | DeactivationCause::Delisted
                )
            })
            .count();
        Health {
            healthy: self.units.len() - unhealthy,
            total: self.units.len(),
            faults,
        }
    }

    async fn notify_admins(&self, text: &str) {
        if let Err(e) = self.notifier.send(Target::Admins, text).await {
            warn!(error = %e, "Admin notification failed");
        }
    }
}

fn is_active(unit: &SymbolAnalysisUnit, universe: &Universe) -> bool {
    !unit.is_deactivated() && (unit.is_reference() || !universe.is_disabled(unit.symbol()))
}

fn split_active<'a>(
    units: &'a mut [SymbolAnalysisUnit],
    universe: &Universe,
) -> (Vec<&'a mut SymbolAnalysisUnit>, Vec<&'a mut SymbolAnalysisUnit>) {
    units
        .iter_mut()
        .filter(|unit| is_active(unit, universe))
        .partition(|unit| unit.is_reference())
}

/// Time left until the next 00:00 UTC.
pub fn until_utc_midnight(now: DateTime<Utc>) -> Duration {
    now.date_naive()
        .checked_add_days(Days::new(1))
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
        .and_then(|midnight| (midnight - now).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 3600))
}
