//! Scaler executors — actuate a decided replica count.
//!
//! `apply` is idempotent: the executor compares the replica count it
//! believes is running against the decision's proposal and only acts when
//! they differ.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::decider::ScalingDecision;

/// Why a scale action could not be applied.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScaleError {
    #[error("scaling {service} to {replicas} failed: {reason}")]
    Failed {
        service: String,
        replicas: u32,
        reason: String,
    },

    #[error("scaler timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// What `apply` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The replica count changed.
    Applied { from: u32, to: u32 },
    /// The service already ran the proposed count.
    Unchanged { replicas: u32 },
}

/// Boxed future alias for apply outcomes.
pub type ApplyFuture<'a> = Pin<Box<dyn Future<Output = Result<ApplyOutcome, ScaleError>> + Send + 'a>>;

/// Actuates scaling decisions.
pub trait ScalerExecutor: Send + Sync {
    fn apply<'a>(&'a self, decision: &'a ScalingDecision) -> ApplyFuture<'a>;
}

/// Callback type for performing scaling actions.
///
/// Called with (service, target_replicas).
pub type ScaleCallback = Box<dyn Fn(&str, u32) -> ScaleFuture + Send + Sync>;

/// Future returned by a `ScaleCallback`.
pub type ScaleFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Executor that tracks the replica count of every service it has seen
/// and calls out to a scale callback only when a change is needed.
///
/// Without a callback it acts as a dry-run ledger.
#[derive(Default)]
pub struct ReplicaLedger {
    replicas: Mutex<HashMap<String, u32>>,
    scale_fn: Option<ScaleCallback>,
}

impl ReplicaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the callback used to perform scaling.
    pub fn with_scale_fn(mut self, f: ScaleCallback) -> Self {
        self.scale_fn = Some(f);
        self
    }

    /// Start from replica counts known to be running, e.g. the counts a
    /// previous run applied.
    pub fn with_replicas(mut self, replicas: impl IntoIterator<Item = (String, u32)>) -> Self {
        self.replicas.get_mut().extend(replicas);
        self
    }

    /// Record the replica count a service is known to be running.
    pub async fn observe(&self, service: &str, replicas: u32) {
        self.replicas.lock().await.insert(service.to_string(), replicas);
    }

    /// Replica count the ledger believes `service` runs.
    pub async fn replicas(&self, service: &str) -> Option<u32> {
        self.replicas.lock().await.get(service).copied()
    }

    /// Every tracked service and its replica count.
    pub async fn snapshot(&self) -> HashMap<String, u32> {
        self.replicas.lock().await.clone()
    }
}

impl ScalerExecutor for ReplicaLedger {
    fn apply<'a>(&'a self, decision: &'a ScalingDecision) -> ApplyFuture<'a> {
        Box::pin(async move {
            let service = decision.service();
            let desired = decision.proposed_replicas();
            let current = self
                .replicas(service)
                .await
                .unwrap_or(decision.previous_replicas());

            if current == desired {
                return Ok(ApplyOutcome::Unchanged { replicas: current });
            }

            if let Some(ref scale_fn) = self.scale_fn
                && let Err(e) = scale_fn(service, desired).await
            {
                warn!(%service, from = current, to = desired, error = %e, "scaling action failed");
                return Err(ScaleError::Failed {
                    service: service.to_string(),
                    replicas: desired,
                    reason: e.to_string(),
                });
            }

            self.observe(service, desired).await;
            info!(%service, from = current, to = desired, action = %decision.action(), "scaled");
            Ok(ApplyOutcome::Applied {
                from: current,
                to: desired,
            })
        })
    }
}
