//! Per-symbol state: three price series, their indicators, the volume profile
//! smoother, and the latest signals and correlation measurements.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use signals_core::correlation::{self, CorrelationInfo};
use signals_core::impulse;
use signals_core::indicators::{lsma, tmo, zscore};
use signals_core::ladder::Ladder;
use signals_core::liquidation::{self, SignalSet};
use signals_core::series::PriceSeries;
use signals_core::timeframe::Timeframe;
use signals_core::volume_profile::{self, ProfileConfig, RollingPoc};
use signals_providers::notifier::{Notifier, Target};
use signals_providers::provider::{
    MarketDataProvider, RetryPolicy, fetch_last_completed_with_retry, with_retry,
};
use tracing::{debug, info, warn};

use crate::config::HistoryLimits;
use crate::error::EngineError;
use crate::ranking::{UnitReport, detect_inefficiency};
use crate::universe::{ReferenceSnapshot, Universe};

/// Fine lows averaged for the Z-score, and the stdev window.
const Z_SCORE_LENGTH: usize = 72;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum DeactivationCause {
    #[default]
    None,
    TransientError,
    Delisted,
    NotInTop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Uninitialized,
    Initialized,
    Deactivated(DeactivationCause),
}

/// Where a unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Component {
    Ingest,
    Update,
    Compute,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Component::Ingest => f.write_str("ingest"),
            Component::Update => f.write_str("update"),
            Component::Compute => f.write_str("compute"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFault {
    pub component: Component,
    pub message: String,
}

/// Which fetch pass the orchestrator is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Ingest,
    Update,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Ingest => f.write_str("ingest"),
            Operation::Update => f.write_str("update"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnitSettings {
    pub limits: HistoryLimits,
    pub reference_threshold: f64,
    pub profile: ProfileConfig,
    pub retry: RetryPolicy,
}

pub struct SymbolAnalysisUnit {
    symbol: String,
    universe: Arc<Universe>,
    provider: Arc<dyn MarketDataProvider>,
    notifier: Arc<dyn Notifier>,
    settings: UnitSettings,
    coarse: PriceSeries,
    medium: PriceSeries,
    fine: PriceSeries,
    ladder: Ladder,
    smoother: RollingPoc,
    initialized: bool,
    new_medium_bar: bool,
    cause: DeactivationCause,
    fault: Option<UnitFault>,
    signals: Option<SignalSet>,
    correlations: Vec<CorrelationInfo>,
}

impl SymbolAnalysisUnit {
    pub fn new(
        symbol: impl Into<String>,
        universe: Arc<Universe>,
        provider: Arc<dyn MarketDataProvider>,
        notifier: Arc<dyn Notifier>,
        settings: UnitSettings,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            universe,
            provider,
            notifier,
            settings,
            coarse: PriceSeries::new(Timeframe::Coarse),
            medium: PriceSeries::new(Timeframe::Medium),
            fine: PriceSeries::new(Timeframe::Fine),
            ladder: Ladder::for_timeframe(Timeframe::Medium),
            smoother: RollingPoc::new(settings.profile.period),
            initialized: false,
            new_medium_bar: false,
            cause: DeactivationCause::None,
            fault: None,
            signals: None,
            correlations: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_reference(&self) -> bool {
        self.universe.is_reference(&self.symbol)
    }

    pub fn state(&self) -> UnitState {
        match (self.cause, self.initialized) {
            (DeactivationCause::None, true) => UnitState::Initialized,
            (DeactivationCause::None, false) => UnitState::Uninitialized,
            (cause, _) => UnitState::Deactivated(cause),
        }
    }

    pub fn cause(&self) -> DeactivationCause {
        self.cause
    }

    pub fn is_deactivated(&self) -> bool {
        self.cause != DeactivationCause::None
    }

    pub fn fault(&self) -> Option<&UnitFault> {
        self.fault.as_ref()
    }

    pub fn signals(&self) -> Option<&SignalSet> {
        self.signals.as_ref()
    }

    pub fn correlations(&self) -> &[CorrelationInfo] {
        &self.correlations
    }

    pub fn series(&self, timeframe: Timeframe) -> &PriceSeries {
        match timeframe {
            Timeframe::Coarse => &self.coarse,
            Timeframe::Medium => &self.medium,
            Timeframe::Fine => &self.fine,
        }
    }

    fn series_mut(&mut self, timeframe: Timeframe) -> &mut PriceSeries {
        match timeframe {
            Timeframe::Coarse => &mut self.coarse,
            Timeframe::Medium => &mut self.medium,
            Timeframe::Fine => &mut self.fine,
        }
    }

    /// True once the fine series is a full bar behind `now`.
    pub fn time_to_update(&self, now: DateTime<Utc>) -> bool {
        self.fine.is_stale(now)
    }

    /// Apply the turnover ranking. The reference asset is never parked.
    pub fn apply_ranking(&mut self, in_top: bool) {
        if self.is_reference() {
            return;
        }
        match (self.cause, in_top) {
            (DeactivationCause::NotInTop, true) => {
                info!(symbol = %self.symbol, "Back in turnover top, reactivated");
                self.cause = DeactivationCause::None;
            }
            (DeactivationCause::None, false) => {
                debug!(symbol = %self.symbol, "Outside turnover top, parked");
                self.cause = DeactivationCause::NotInTop;
            }
            _ => {}
        }
    }

    pub async fn run(&mut self, operation: Operation) {
        match operation {
            Operation::Ingest => self.ingest().await,
            Operation::Update => self.update_at(Utc::now()).await,
        }
    }

    /// Full history download. Resets every derived value.
    pub async fn ingest(&mut self) {
        if self.is_deactivated() {
            return;
        }
        if let Err(e) = self.try_ingest().await {
            self.fail(Component::Ingest, e).await;
        }
    }

    async fn try_ingest(&mut self) -> Result<(), EngineError> {
        let (coarse, medium, fine) = futures::try_join!(
            self.fetch_series(Timeframe::Coarse),
            self.fetch_series(Timeframe::Medium),
            self.fetch_series(Timeframe::Fine),
        )?;

        if fine.last().is_some_and(|c| c.volume == 0.0) {
            self.delist().await;
            return Ok(());
        }

        self.coarse = coarse;
        self.medium = medium;
        self.fine = fine;
        self.smoother = RollingPoc::new(self.settings.profile.period);
        self.initialized = false;
        self.new_medium_bar = true;
        self.signals = None;
        self.correlations.clear();

        if self.is_reference() {
            self.publish_reference()?;
        }
        debug!(
            symbol = %self.symbol,
            coarse = self.coarse.len(),
            medium = self.medium.len(),
            fine = self.fine.len(),
            "Ingested history"
        );
        Ok(())
    }

    async fn fetch_series(&self, timeframe: Timeframe) -> Result<PriceSeries, EngineError> {
        let provider = self.provider.as_ref();
        let symbol = self.symbol.as_str();
        let limit = self.settings.limits.limit(timeframe);
        let candles = with_retry(provider.name(), symbol, self.settings.retry, move || {
            provider.fetch_candles(symbol, timeframe, limit)
        })
        .await?;
        Ok(PriceSeries::from_candles(timeframe, candles)?)
    }

    /// Append the last completed bar of every stale timeframe.
    pub async fn update_at(&mut self, now: DateTime<Utc>) {
        if self.is_deactivated() {
            return;
        }
        if let Err(e) = self.try_update(now).await {
            self.fail(Component::Update, e).await;
        }
    }

    async fn try_update(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let stale: Vec<Timeframe> = Timeframe::ALL
            .into_iter()
            .filter(|&tf| self.series(tf).is_stale(now))
            .collect();
        let provider = self.provider.as_ref();
        let fetched = try_join_all(stale.iter().map(|&tf| {
            fetch_last_completed_with_retry(provider, &self.symbol, tf, self.settings.retry)
        }))
        .await?;

        for (timeframe, candle) in stale.into_iter().zip(fetched) {
            let zero_volume = candle.volume == 0.0;
            let series = self.series_mut(timeframe);
            if !series.append(candle) {
                continue;
            }
            lsma::smooth_last(series.candles_mut(), lsma::DEFAULT_PERIOD)?;

            if zero_volume {
                self.delist().await;
                return Ok(());
            }
            match timeframe {
                Timeframe::Coarse if self.is_reference() => self.publish_reference()?,
                Timeframe::Medium => self.new_medium_bar = true,
                _ => {}
            }
        }
        Ok(())
    }

    fn publish_reference(&self) -> Result<(), EngineError> {
        let candles = self.coarse.candles();
        let oscillator = tmo::rolling_reference(candles, tmo::BARS_PER_WINDOW);
        let segmentation =
            impulse::segment(candles, &oscillator, self.settings.reference_threshold)?;
        info!(
            symbol = %self.symbol,
            impulses = segmentation.impulses.len(),
            segments = segmentation.segments.len(),
            "Published reference segmentation"
        );
        self.universe.publish_reference(ReferenceSnapshot {
            candles: candles.to_vec(),
            segmentation,
        });
        Ok(())
    }

    /// Recompute indicators, the volume profile and signals, then measure
    /// against the reference segments.
    pub async fn compute(&mut self) {
        if self.is_deactivated() {
            return;
        }
        if let Err(e) = self.try_compute() {
            self.fail(Component::Compute, e).await;
            return;
        }
        if !self.is_reference() {
            self.probe_reference().await;
        }
    }

    fn try_compute(&mut self) -> Result<(), EngineError> {
        let is_reference = self.is_reference();
        if !self.initialized {
            for timeframe in Timeframe::ALL {
                lsma::smooth(self.series_mut(timeframe).candles_mut(), lsma::DEFAULT_PERIOD);
            }
            tmo::fill_history(self.medium.candles_mut(), is_reference);
            self.smoother = volume_profile::build_history(
                self.medium.candles_mut(),
                &self.settings.profile,
                &self.ladder,
            )?;
            self.initialized = true;
            debug!(symbol = %self.symbol, "Built indicator history");
        } else if self.new_medium_bar {
            tmo::fill_last(self.medium.candles_mut(), is_reference)?;
            volume_profile::update_last(
                self.medium.candles_mut(),
                &self.settings.profile,
                &self.ladder,
                &mut self.smoother,
            )?;
        }
        self.new_medium_bar = false;

        let lows: Vec<f64> = self.fine.candles().iter().map(|c| c.low).collect();
        if let Some(last) = self.fine.last_mut() {
            last.z_score = Some(zscore::z_score(
                &lows,
                lows.len() - 1,
                Z_SCORE_LENGTH,
                Z_SCORE_LENGTH,
            ));
        }

        self.signals = Some(liquidation::assess(
            &self.symbol,
            self.medium.candles(),
            self.fine.candles(),
        )?);
        Ok(())
    }

    /// Measure this symbol against every reference segment. Failed segments
    /// are skipped and reported; they never fail the unit.
    async fn probe_reference(&mut self) {
        let snapshot = self.universe.reference_snapshot();
        let mut infos = Vec::with_capacity(snapshot.segmentation.segments.len());
        let mut skipped = Vec::new();
        for segment in &snapshot.segmentation.segments {
            match correlation::probe(&self.symbol, &snapshot.candles, self.coarse.candles(), segment) {
                Ok(info) => infos.push(info),
                Err(e) => {
                    warn!(symbol = %self.symbol, segment = segment.index, error = %e, "Correlation skipped");
                    skipped.push(format!("segment {}: {e}", segment.index));
                }
            }
        }
        self.correlations = infos;

        if !skipped.is_empty() {
            self.notify_admins(&format!(
                "Correlation skipped for {}:\n{}",
                self.symbol,
                skipped.join("\n")
            ))
            .await;
        }
    }

    /// Snapshot for the ranking pass. `None` until signals exist.
    pub fn report(&self) -> Option<UnitReport> {
        let signals = self.signals.clone()?;
        let last = self.medium.last()?;
        let tmo180: Vec<Option<f64>> = self.medium.candles().iter().map(|c| c.tmo.tmo180).collect();
        Some(UnitReport {
            symbol: self.symbol.clone(),
            signals,
            tmo: last.tmo,
            medium_close: last.close,
            inefficiency: detect_inefficiency(&tmo180),
            correlations: self.correlations.clone(),
        })
    }

    async fn fail(&mut self, component: Component, error: EngineError) {
        warn!(symbol = %self.symbol, %component, error = %error, "Unit deactivated");
        if error.is_rejection() {
            self.notify_admins(&format!(
                "Rate limit exceeded while fetching {}. Requests are paused until the exchange lifts the limit.",
                self.symbol
            ))
            .await;
        }
        self.cause = DeactivationCause::TransientError;
        self.fault = Some(UnitFault {
            component,
            message: error.to_string(),
        });
        self.notify_admins(&format!(
            "Error in {} ({component}): {error}\nThe unit is stopped until the next restart.",
            self.symbol
        ))
        .await;
    }

    async fn delist(&mut self) {
        warn!(symbol = %self.symbol, "Zero-volume bar, treating as delisted");
        self.cause = DeactivationCause::Delisted;
        self.notify_admins(&format!(
            "{} reports zero volume and is no longer tracked",
            self.symbol
        ))
        .await;
    }

    async fn notify_admins(&self, text: &str) {
        if let Err(e) = self.notifier.send(Target::Admins, text).await {
            warn!(symbol = %self.symbol, error = %e, "Admin notification failed");
        }
    }
}
