use std::{
    collections::BTreeSet,
    future::Future,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use itertools::Itertools;
use strum::Display;
use tokio::time::MissedTickBehavior;

use crate::{
    cardinality::HighCardSeries,
    config::PromConfig,
    gauge::GaugeSink,
    ledger::SuppressionLedger,
    probe::SeriesCardinalityProbe,
    rule,
    store::Configurator,
    waiter::PropagationWaiter,
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PatrolState {
    Idle,
    Detecting,
    Generating,
    Reconciling,
    AwaitingPropagation,
}

#[derive(Debug, Clone)]
pub struct PatrolSettings {
    pub interval: Duration,
    pub top_n: usize,
    pub threshold: f64,
    pub propagation_attempts: usize,
    pub poll_interval: Duration,
}

impl Default for PatrolSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            top_n: 5,
            threshold: 100.0,
            propagation_attempts: 12,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub candidates: Vec<String>,
    /// `metric.label` of every rule written into the configuration.
    pub suppressed: Vec<String>,
    /// Candidates that failed or had nothing to suppress.
    pub skipped: usize,
    pub reloaded: bool,
}

/// A reversible suppression reported by [`Patrol::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suppression {
    pub metric: String,
    pub label: String,
}

impl std::fmt::Display for Suppression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.metric, self.label)
    }
}

impl std::str::FromStr for Suppression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((metric, label)) if !metric.is_empty() && !label.is_empty() => Ok(Self {
                metric: metric.to_string(),
                label: label.to_string(),
            }),
            _ => Err(Error::InvalidInput(format!(
                "{s:?} is not of the form metric.label"
            ))),
        }
    }
}

/// Detects exploding metrics on every tick and suppresses their offending
/// label; also the entry point for listing and reversing suppressions.
pub struct Patrol {
    probe: SeriesCardinalityProbe,
    prom_config: Arc<dyn Configurator>,
    ledger: SuppressionLedger,
    waiter: PropagationWaiter,
    gauges: Arc<dyn GaugeSink>,
    settings: PatrolSettings,
    state: RwLock<PatrolState>,
    /// Rules written but not yet seen propagated; re-checked along with the
    /// next new rule.
    unpropagated: Mutex<BTreeSet<String>>,
}

impl Patrol {
    pub fn new(
        probe: SeriesCardinalityProbe,
        prom_config: Arc<dyn Configurator>,
        ledger: SuppressionLedger,
        waiter: PropagationWaiter,
        gauges: Arc<dyn GaugeSink>,
        settings: PatrolSettings,
    ) -> Self {
        Self {
            probe,
            prom_config,
            ledger,
            waiter,
            gauges,
            settings,
            state: RwLock::new(PatrolState::Idle),
            unpropagated: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn state(&self) -> PatrolState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, to: PatrolState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != to {
            tracing::debug!(from = %*state, %to, "patrol state");
            *state = to;
        }
    }

    /// Ticks every `interval` until `shutdown` resolves. A tick always runs to
    /// completion before the next one starts; a slow tick delays the next.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.settings.interval, "patrol started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.tick() => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "tick aborted, retrying next interval");
                    }
                }
            }
        }
        self.transition(PatrolState::Idle);
        tracing::info!("patrol stopped");
    }

    /// One pass of detect, generate, reconcile and propagate.
    ///
    /// Only a failure to enumerate exploding metrics fails the tick; anything
    /// going wrong with a single candidate is logged and that candidate
    /// skipped.
    pub async fn tick(&self) -> Result<TickReport> {
        let started = time::Instant::now();
        let result = self.tick_inner().await;
        self.transition(PatrolState::Idle);
        if let Ok(report) = &result {
            if !report.candidates.is_empty() {
                tracing::info!(
                    candidates = %report.candidates.iter().join(","),
                    suppressed = report.suppressed.len(),
                    skipped = report.skipped,
                    reloaded = report.reloaded,
                    elapsed = %started.elapsed(),
                    "tick finished"
                );
            }
        }
        result
    }

    async fn tick_inner(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        self.transition(PatrolState::Detecting);
        report.candidates = self
            .probe
            .find_exploding_metrics(self.settings.threshold, self.settings.top_n)
            .await?;
        if report.candidates.is_empty() {
            return Ok(report);
        }

        self.transition(PatrolState::Generating);
        let mut planned = Vec::new();
        for metric in &report.candidates {
            match self.plan(metric).await {
                Ok(Some(item)) => planned.push(item),
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!(%metric, error = %err, "skipping candidate");
                    report.skipped += 1;
                }
            }
        }

        self.transition(PatrolState::Reconciling);
        let mut inserted = Vec::new();
        for (series, rule) in &planned {
            match self.reconcile(series, rule).await {
                Ok(Some(encoded)) => {
                    report
                        .suppressed
                        .push(format!("{}.{}", series.metric_name, series.label_name));
                    inserted.push(encoded);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        metric = %series.metric_name,
                        label = %series.label_name,
                        error = %err,
                        "failed to apply suppression"
                    );
                    report.skipped += 1;
                }
            }
        }
        if inserted.is_empty() {
            return Ok(report);
        }

        self.transition(PatrolState::AwaitingPropagation);
        if let Err(err) = self.prune_unpropagated().await {
            tracing::warn!(error = %err, "failed to re-check pending rules");
        }
        let expected = {
            let mut pending = self.unpropagated.lock().unwrap_or_else(|e| e.into_inner());
            pending.extend(inserted);
            pending.iter().cloned().collect::<Vec<_>>()
        };
        match self
            .waiter
            .wait_and_reload(
                &expected,
                self.settings.propagation_attempts,
                self.settings.poll_interval,
            )
            .await
        {
            Ok(()) => {
                self.unpropagated
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clear();
                report.reloaded = true;
            }
            Err(err) => tracing::warn!(error = %err, "reload deferred"),
        }
        Ok(report)
    }

    /// Drops pending rules that are no longer in the written configuration,
    /// such as ones reversed by `unsilence` from another process. They would
    /// never show up in the rendered copy and would hold back every reload.
    async fn prune_unpropagated(&self) -> Result<()> {
        let config = PromConfig::from_yaml(&self.prom_config.read().await?)?;
        let pending = self
            .unpropagated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut gone = Vec::new();
        for encoded in pending {
            if !config.contains_rule(&encoded)? {
                gone.push(encoded);
            }
        }
        if !gone.is_empty() {
            tracing::info!(count = gone.len(), "dropping pending rules no longer configured");
            let mut pending = self.unpropagated.lock().unwrap_or_else(|e| e.into_inner());
            for encoded in &gone {
                pending.remove(encoded);
            }
        }
        Ok(())
    }

    /// Finds the label to suppress on `metric` and builds its rule.
    async fn plan(&self, metric: &str) -> Result<Option<(HighCardSeries, rule::RelabelRule)>> {
        let series = self.probe.discover_high_card_label(metric).await?;
        if !series.is_actionable() {
            tracing::info!(%metric, "no label distinguishes the series, nothing to suppress");
            return Ok(None);
        }
        self.gauges
            .set(
                &series.metric_name,
                &series.label_name,
                series.distinct_values as f64,
            )
            .await;
        let rule = rule::generate(&series)?;
        Ok(Some((series, rule)))
    }

    /// Merges `rule` into the configuration and records it in the ledger.
    /// Returns the rule's encoding when the configuration changed.
    async fn reconcile(
        &self,
        series: &HighCardSeries,
        rule: &rule::RelabelRule,
    ) -> Result<Option<String>> {
        let encoded = rule.encode()?;
        let mut config = PromConfig::from_yaml(&self.prom_config.read().await?)?;
        let inserted = config.merge(rule)?;
        if inserted {
            self.prom_config.write(&config.to_yaml()?).await?;
        } else if !config.contains_rule(&encoded)? {
            tracing::warn!(
                metric = %series.metric_name,
                "configuration has no scrape jobs to suppress in"
            );
            return Ok(None);
        }
        self.ledger
            .record(&series.metric_name, &series.label_name, &encoded)
            .await?;
        Ok(inserted.then_some(encoded))
    }

    /// Every currently suppressed label.
    pub async fn list(&self) -> Result<Vec<Suppression>> {
        Ok(self
            .ledger
            .list()
            .await?
            .into_iter()
            .map(|(metric, label)| Suppression { metric, label })
            .collect())
    }

    /// Reverses the suppression named by `metric.label`: removes its rule from
    /// every job, forgets it in the ledger and zeroes its gauge.
    pub async fn unsilence(&self, identifier: &str) -> Result<Suppression> {
        let target: Suppression = identifier.parse()?;
        let encoded = self
            .ledger
            .lookup(&target.metric, &target.label)
            .await?
            .ok_or_else(|| Error::NotSuppressed {
                metric: target.metric.clone(),
                label: target.label.clone(),
            })?;

        let mut config = PromConfig::from_yaml(&self.prom_config.read().await?)?;
        if config.remove(&encoded)? {
            self.prom_config.write(&config.to_yaml()?).await?;
        } else {
            tracing::warn!(suppression = %target, "rule already absent from configuration");
        }
        self.ledger.forget(&target.metric, &target.label).await?;
        self.unpropagated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&encoded);
        self.gauges.set(&target.metric, &target.label, 0.0).await;
        tracing::info!(suppression = %target, "removed suppression");
        Ok(target)
    }
}
