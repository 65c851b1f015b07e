//! Per-service scaling unit: sample, decide, apply, record.
//!
//! One unit runs per service per cycle in its own task. Everything that
//! can go wrong inside a unit is recorded against `scaling/<service>` and
//! reported back as a value; nothing propagates to sibling units.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use fleet_autoscale::{ApplyOutcome, ScaleError, ScalerExecutor, ScalingDecision, decide};
use fleet_core::{MetricSample, ScalingBounds, ServiceSpec};
use fleet_metrics::{MetricError, MetricSource};
use fleet_state::{StateStore, Status, scaling_component};

/// How one service's scaling unit ended.
#[derive(Debug)]
pub enum UnitOutcome {
    Completed(ScalingDecision),
    /// Recorded as failed. `decision` is set when the failure came after
    /// deciding (the apply step).
    Failed {
        service: String,
        decision: Option<ScalingDecision>,
        reason: String,
    },
    /// Skipped or abandoned because the cycle was cancelled.
    Cancelled { service: String },
}

/// Shared, cheaply cloned context for scaling units.
#[derive(Clone)]
pub(crate) struct ScalingUnit {
    pub state: StateStore,
    pub metrics: Arc<dyn MetricSource>,
    pub scaler: Arc<dyn ScalerExecutor>,
    pub bounds: ScalingBounds,
    pub metric_timeout: Duration,
    pub apply_timeout: Duration,
    pub cancel: watch::Receiver<bool>,
}

impl ScalingUnit {
    pub async fn run(self, spec: ServiceSpec) -> UnitOutcome {
        let service = spec.name.clone();
        let component = scaling_component(&service);

        if is_cancelled(&self.cancel) {
            return UnitOutcome::Cancelled { service };
        }

        // The pending record must be durable before any terminal record.
        self.record(&component, Status::Pending, "");

        let sample = match self.sample(&service).await {
            Ok(sample) => sample,
            Err(e) => {
                let reason = format!("metrics: {e}");
                warn!(%service, error = %e, "metric fetch failed");
                self.record(&component, Status::Failed, &reason);
                return UnitOutcome::Failed {
                    service,
                    decision: None,
                    reason,
                };
            }
        };

        let decision = decide(&spec, &sample, &self.bounds);

        if is_cancelled(&self.cancel) {
            self.record(&component, Status::Failed, "cancelled before apply");
            return UnitOutcome::Cancelled { service };
        }

        match self.apply(&decision).await {
            Ok(outcome) => {
                let (running, detail) = match outcome {
                    ApplyOutcome::Applied { from, to } => (
                        to,
                        format!("{} {from}->{to}: {}", decision.action(), decision.justification()),
                    ),
                    ApplyOutcome::Unchanged { replicas } => (
                        replicas,
                        format!("{} at {replicas}: {}", decision.action(), decision.justification()),
                    ),
                };
                self.remember_replicas(&service, running);
                self.record(&component, Status::Completed, &detail);
                UnitOutcome::Completed(decision)
            }
            Err(e) => {
                let reason = format!("scaler: {e}");
                warn!(%service, error = %e, "scaler apply failed");
                self.record(&component, Status::Failed, &reason);
                UnitOutcome::Failed {
                    service,
                    decision: Some(decision),
                    reason,
                }
            }
        }
    }

    async fn sample(&self, service: &str) -> Result<MetricSample, MetricError> {
        // Bounded here as well as inside the source.
        match tokio::time::timeout(
            self.metric_timeout,
            self.metrics.sample(service, self.metric_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MetricError::Timeout(self.metric_timeout)),
        }
    }

    async fn apply(&self, decision: &ScalingDecision) -> Result<ApplyOutcome, ScaleError> {
        match tokio::time::timeout(self.apply_timeout, self.scaler.apply(decision)).await {
            Ok(result) => result,
            Err(_) => Err(ScaleError::Timeout(self.apply_timeout)),
        }
    }

    fn remember_replicas(&self, service: &str, replicas: u32) {
        if let Err(e) = self.state.save_replicas(service, replicas) {
            warn!(%service, replicas, error = %e, "failed to save applied replicas");
        }
    }

    /// Per-service records are best effort: a store failure is logged and
    /// the unit carries on.
    fn record(&self, component: &str, status: Status, detail: &str) {
        match self.state.save(component, status, detail) {
            Ok(record) => debug!(seq = record.seq, %component, %status, "scaling unit recorded"),
            Err(e) => warn!(%component, %status, error = %e, "failed to record scaling unit"),
        }
    }
}

pub(crate) fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}
