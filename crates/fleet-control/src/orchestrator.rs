//! Control loop orchestrator — sequences one cycle end to end.
//!
//! ```text
//! Idle → Discovering → HealthChecking → Scaling → Reporting → Idle
//! ```
//!
//! Every stage transition is written to the state store before the next
//! stage starts. Health failures and per-service scaling failures are
//! recorded and the cycle carries on; only an unavailable inventory, a
//! cancellation, or a failing state store ends a cycle without a report.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use fleet_autoscale::{ScalerExecutor, ScalingDecision};
use fleet_core::{CheckName, FleetConfig, InventoryError, InventoryProvider, ScalingBounds, ServiceSpec};
use fleet_health::{HealthCheckResult, HealthEvaluator};
use fleet_metrics::MetricSource;
use fleet_report::FleetReport;
use fleet_state::{CYCLE_COMPONENT, StateStore, Status, health_component, scaling_component};

use crate::error::CycleError;
use crate::phase::{CyclePhase, CycleStatus};
use crate::unit::{ScalingUnit, UnitOutcome, is_cancelled};

/// Stage component ids, as counted by `StateStore::progress`.
pub mod stage {
    pub const DISCOVERY: &str = "discovery";
    pub const HEALTH: &str = "health";
    pub const SECURITY: &str = "security";
    pub const SCALING: &str = "scaling";
    pub const REPORTING: &str = "reporting";
    pub const CLEANUP: &str = "cleanup";
}

/// Checks whose failure fails the security stage.
const SECURITY_CHECKS: [CheckName; 2] = [CheckName::SecurityPolicy, CheckName::SslCertificates];

/// Tunables for one cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub bounds: ScalingBounds,
    pub metric_timeout: Duration,
    pub apply_timeout: Duration,
    pub inventory_timeout: Duration,
    /// Records to keep when compacting after each cycle. `None` disables
    /// compaction.
    pub retention: Option<usize>,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            bounds: ScalingBounds::default(),
            metric_timeout: Duration::from_secs(5),
            apply_timeout: Duration::from_secs(30),
            inventory_timeout: Duration::from_secs(10),
            retention: None,
        }
    }
}

impl CycleSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            bounds: config.scaling,
            metric_timeout: config.control.metric_timeout(),
            apply_timeout: config.control.apply_timeout(),
            inventory_timeout: config.control.inventory_timeout(),
            retention: config.control.retention,
        }
    }
}

/// Result of a cycle that got as far as producing a report.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub status: CycleStatus,
    /// `StateStore::progress` at the end of the cycle.
    pub progress: u8,
    pub report: FleetReport,
}

/// What the scaling phase produced.
struct ScalingPhase {
    decisions: Vec<ScalingDecision>,
    failed: Vec<String>,
    cancelled: bool,
}

/// The top-level driver. Owns no cycle state between cycles; everything
/// durable lives in the `StateStore`.
pub struct Orchestrator {
    state: StateStore,
    inventory: Arc<dyn InventoryProvider>,
    metrics: Arc<dyn MetricSource>,
    scaler: Arc<dyn ScalerExecutor>,
    health: HealthEvaluator,
    settings: CycleSettings,
    phase: watch::Sender<CyclePhase>,
}

impl Orchestrator {
    /// An orchestrator with default settings and an empty health battery.
    pub fn new(
        state: StateStore,
        inventory: Arc<dyn InventoryProvider>,
        metrics: Arc<dyn MetricSource>,
        scaler: Arc<dyn ScalerExecutor>,
    ) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            state,
            inventory,
            metrics,
            scaler,
            health: HealthEvaluator::new(Duration::from_secs(5)),
            settings: CycleSettings::default(),
            phase,
        }
    }

    pub fn with_health(mut self, health: HealthEvaluator) -> Self {
        self.health = health;
        self
    }

    pub fn with_settings(mut self, settings: CycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Current phase.
    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    /// Run one cycle. `cancel` flipping to `true` stops the cycle at the
    /// next phase boundary or per-service unit; records already written
    /// stay written.
    pub async fn run_cycle(&self, cancel: watch::Receiver<bool>) -> Result<CycleOutcome, CycleError> {
        match self.cycle(&cancel).await {
            Ok(outcome) => {
                self.enter(CyclePhase::Idle);
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "cycle failed");
                if let Err(store_err) = self.state.save(CYCLE_COMPONENT, Status::Failed, &e.to_string()) {
                    warn!(error = %store_err, "failed to record cycle failure");
                }
                self.enter(CyclePhase::Failed);
                Err(e)
            }
        }
    }

    /// Run cycles every `interval` until `shutdown` flips. `on_outcome` sees
    /// every cycle that produced a report.
    pub async fn run<F>(&self, interval: Duration, mut shutdown: watch::Receiver<bool>, mut on_outcome: F)
    where
        F: FnMut(&CycleOutcome),
    {
        info!(interval_ms = interval.as_millis() as u64, "control loop started");

        loop {
            if is_cancelled(&shutdown) {
                break;
            }
            match self.run_cycle(shutdown.clone()).await {
                Ok(outcome) => on_outcome(&outcome),
                Err(CycleError::Cancelled { .. }) => break,
                // Already logged; the next cycle retries.
                Err(_) => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("control loop shutting down");
    }

    // ── Cycle ──────────────────────────────────────────────────────

    async fn cycle(&self, cancel: &watch::Receiver<bool>) -> Result<CycleOutcome, CycleError> {
        let cycle_start = self.state.begin_cycle()?;

        // Discovering
        self.checkpoint(CyclePhase::Discovering, cancel)?;
        self.state.save(stage::DISCOVERY, Status::Pending, "")?;
        let fleet = match self.discover().await {
            Ok(fleet) => fleet,
            Err(e) => {
                self.state.save(stage::DISCOVERY, Status::Failed, &e.to_string())?;
                return Err(e);
            }
        };
        self.state
            .save(stage::DISCOVERY, Status::Completed, &format!("{} services", fleet.len()))?;

        // HealthChecking
        self.checkpoint(CyclePhase::HealthChecking, cancel)?;
        self.state.save(stage::HEALTH, Status::Running, "")?;
        let results = self.health.evaluate(&fleet).await;
        self.record_health(&results)?;

        // Scaling
        self.checkpoint(CyclePhase::Scaling, cancel)?;
        self.state.save(stage::SCALING, Status::Running, "")?;
        let scaling = self.scale(&fleet, cancel).await;
        if scaling.cancelled {
            self.state.save(stage::SCALING, Status::Failed, "cancelled")?;
            return Err(CycleError::Cancelled {
                phase: CyclePhase::Scaling,
            });
        }
        let completed = fleet.len() - scaling.failed.len();
        if scaling.failed.is_empty() {
            self.state.save(
                stage::SCALING,
                Status::Completed,
                &format!("{completed}/{} services scaled", fleet.len()),
            )?;
        } else {
            self.state.save(
                stage::SCALING,
                Status::Failed,
                &format!(
                    "{}/{} services failed: {}",
                    scaling.failed.len(),
                    fleet.len(),
                    scaling.failed.join(", ")
                ),
            )?;
        }

        // Reporting
        self.checkpoint(CyclePhase::Reporting, cancel)?;
        self.state.save(stage::REPORTING, Status::Running, "")?;
        let history = self.state.history_since(cycle_start)?;
        let report = fleet_report::build(&results, &scaling.decisions, &history);
        self.state.save(
            stage::REPORTING,
            Status::Completed,
            &format!("{} recommendations", report.recommendations.len()),
        )?;

        self.cleanup()?;

        let progress = self.state.progress()?;
        let status = CycleStatus::from_progress(progress);
        self.state
            .save(CYCLE_COMPONENT, Status::Completed, &format!("{status} ({progress}%)"))?;
        info!(
            %status,
            progress,
            health_score = report.health.score,
            scaled_up = report.scaling.scaled_up,
            scaled_down = report.scaling.scaled_down,
            failed_services = report.scaling.failed_services.len(),
            "cycle complete"
        );

        Ok(CycleOutcome {
            status,
            progress,
            report,
        })
    }

    /// Enter `phase` unless the cycle has been cancelled.
    fn checkpoint(&self, phase: CyclePhase, cancel: &watch::Receiver<bool>) -> Result<(), CycleError> {
        if is_cancelled(cancel) {
            info!(%phase, "cycle cancelled");
            return Err(CycleError::Cancelled { phase });
        }
        self.enter(phase);
        Ok(())
    }

    fn enter(&self, phase: CyclePhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "cycle phase");
        }
    }

    // ── Stages ─────────────────────────────────────────────────────

    async fn discover(&self) -> Result<Vec<ServiceSpec>, CycleError> {
        let timeout = self.settings.inventory_timeout;
        let fleet = match tokio::time::timeout(timeout, self.inventory.list_services()).await {
            Ok(listed) => listed?,
            Err(_) => return Err(InventoryError::Timeout(timeout).into()),
        };

        let mut seen = HashSet::new();
        for spec in &fleet {
            if !seen.insert(spec.name.as_str()) {
                return Err(CycleError::DuplicateService(spec.name.clone()));
            }
        }
        info!(services = fleet.len(), "fleet discovered");
        Ok(fleet)
    }

    fn record_health(&self, results: &[HealthCheckResult]) -> Result<(), CycleError> {
        for r in results {
            let status = if r.passed { Status::Completed } else { Status::Failed };
            self.state
                .save(&health_component(r.name.as_str()), status, &r.reason)?;
        }

        let failed: Vec<&str> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.name.as_str())
            .collect();
        if failed.is_empty() {
            self.state.save(
                stage::HEALTH,
                Status::Completed,
                &format!("{n}/{n} checks passed", n = results.len()),
            )?;
        } else {
            self.state.save(
                stage::HEALTH,
                Status::Failed,
                &format!("{}/{} checks failed: {}", failed.len(), results.len(), failed.join(", ")),
            )?;
        }

        let security_failures: Vec<&HealthCheckResult> = results
            .iter()
            .filter(|r| SECURITY_CHECKS.contains(&r.name) && !r.passed)
            .collect();
        if security_failures.is_empty() {
            self.state.save(stage::SECURITY, Status::Completed, "")?;
        } else {
            let detail = security_failures
                .iter()
                .map(|r| format!("{}: {}", r.name, r.reason))
                .collect::<Vec<_>>()
                .join("; ");
            self.state.save(stage::SECURITY, Status::Failed, &detail)?;
        }
        Ok(())
    }

    /// Fan out one scaling unit per service and collect their outcomes.
    async fn scale(&self, fleet: &[ServiceSpec], cancel: &watch::Receiver<bool>) -> ScalingPhase {
        let unit = ScalingUnit {
            state: self.state.clone(),
            metrics: Arc::clone(&self.metrics),
            scaler: Arc::clone(&self.scaler),
            bounds: self.settings.bounds,
            metric_timeout: self.settings.metric_timeout,
            apply_timeout: self.settings.apply_timeout,
            cancel: cancel.clone(),
        };

        let mut units = JoinSet::new();
        let mut services = HashMap::new();
        for spec in fleet {
            let name = spec.name.clone();
            let handle = units.spawn(unit.clone().run(spec.clone()));
            services.insert(handle.id(), name);
        }

        let mut phase = ScalingPhase {
            decisions: Vec::with_capacity(fleet.len()),
            failed: Vec::new(),
            cancelled: false,
        };
        while let Some(joined) = units.join_next_with_id().await {
            match joined {
                Ok((_, UnitOutcome::Completed(decision))) => phase.decisions.push(decision),
                Ok((_, UnitOutcome::Failed { service, decision, .. })) => {
                    phase.decisions.extend(decision);
                    phase.failed.push(service);
                }
                Ok((_, UnitOutcome::Cancelled { .. })) => phase.cancelled = true,
                Err(e) => {
                    let service = services
                        .get(&e.id())
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    let reason = if e.is_panic() {
                        "scaling unit panicked".to_string()
                    } else {
                        "scaling unit aborted".to_string()
                    };
                    warn!(%service, error = %e, "scaling unit did not finish");
                    if let Err(store_err) =
                        self.state.save(&scaling_component(&service), Status::Failed, &reason)
                    {
                        warn!(%service, error = %store_err, "failed to record scaling unit");
                    }
                    phase.failed.push(service);
                }
            }
        }

        // Decisions come back in completion order.
        phase.decisions.sort_by(|a, b| a.service().cmp(b.service()));
        phase.failed.sort();
        phase
    }

    fn cleanup(&self) -> Result<(), CycleError> {
        self.state.save(stage::CLEANUP, Status::Running, "")?;
        match self.settings.retention {
            Some(keep) => match self.state.compact(keep) {
                Ok(removed) => {
                    self.state
                        .save(stage::CLEANUP, Status::Completed, &format!("{removed} records compacted"))?;
                }
                Err(e) => {
                    warn!(error = %e, "state compaction failed");
                    self.state.save(stage::CLEANUP, Status::Failed, &e.to_string())?;
                }
            },
            None => {
                self.state.save(stage::CLEANUP, Status::Completed, "retention disabled")?;
            }
        }
        Ok(())
    }
}
