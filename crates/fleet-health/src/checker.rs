//! Health check seam and probe primitives.
//!
//! A `HealthCheck` either probes something fleet-wide (a database, the load
//! balancer) or is run once per `ServiceSpec`. Probes report failure as a
//! `CheckError`; the evaluator turns every outcome, including panics and
//! timeouts, into a `HealthCheckResult`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use fleet_core::{CheckName, ServiceSpec};

/// Why a check did not pass.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CheckError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("check panicked: {0}")]
    Panicked(String),
}

/// Boxed future alias for probe outcomes.
pub type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CheckError>> + Send + 'a>>;

/// What a check runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckScope {
    /// Probed once per cycle.
    Fleet,
    /// Probed once per service; fails if any service fails.
    PerService,
}

/// One entry in the health battery.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> CheckName;

    fn scope(&self) -> CheckScope {
        CheckScope::Fleet
    }

    /// Run the probe. `service` is `Some` exactly when `scope()` is
    /// `PerService`.
    fn probe<'a>(&'a self, service: Option<&'a ServiceSpec>) -> CheckFuture<'a>;
}

/// Verdict of one check for one cycle. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckResult {
    pub name: CheckName,
    pub passed: bool,
    pub reason: String,
    /// Services that failed a per-service check. Empty for fleet checks.
    pub failed_services: Vec<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

// ── Probes ────────────────────────────────────────────────────────

/// Result of a single HTTP health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy,
    /// The endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error).
    Failed,
}

impl ProbeResult {
    /// Map to a check outcome, naming the probed URI on failure.
    pub fn into_check(self, uri: &str) -> Result<(), CheckError> {
        match self {
            ProbeResult::Healthy => Ok(()),
            ProbeResult::Unhealthy => Err(CheckError::Failed(format!("{uri} answered non-2xx"))),
            ProbeResult::Failed => Err(CheckError::Failed(format!("{uri} unreachable"))),
        }
    }
}

/// Perform an HTTP health probe against an endpoint.
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
/// or `Failed` if the connection fails. Callers bound the duration.
pub async fn http_probe(address: &str, path: &str) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let stream = match tokio::net::TcpStream::connect(address).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, %uri, "health probe connection failed");
            return ProbeResult::Failed;
        }
    };

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, %uri, "health probe handshake failed");
            return ProbeResult::Failed;
        }
    };

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = match http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "fleet-health/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => {
            debug!(error = %e, %uri, "health probe request invalid");
            return ProbeResult::Failed;
        }
    };

    match sender.send_request(req).await {
        Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
        Ok(resp) => {
            debug!(status = %resp.status(), %uri, "health probe non-2xx");
            ProbeResult::Unhealthy
        }
        Err(e) => {
            debug!(error = %e, %uri, "health probe request failed");
            ProbeResult::Failed
        }
    }
}

/// Open and drop a TCP connection to `address`.
pub async fn tcp_probe(address: &str) -> Result<(), CheckError> {
    match tokio::net::TcpStream::connect(address).await {
        Ok(_) => Ok(()),
        Err(e) => {
            debug!(error = %e, %address, "tcp probe failed");
            Err(CheckError::Failed(format!("connect {address}: {e}")))
        }
    }
}

/// Check that `path` (or, for a directory, its newest entry) was modified
/// within `max_age`.
pub async fn freshness_probe(path: &Path, max_age: Duration) -> Result<(), CheckError> {
    let fail = |msg: String| CheckError::Failed(format!("{}: {msg}", path.display()));

    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| fail(e.to_string()))?;

    let newest = if meta.is_dir() {
        let mut newest: Option<SystemTime> = None;
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| fail(e.to_string()))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| fail(e.to_string()))? {
            if let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) {
                newest = Some(newest.map_or(modified, |n| n.max(modified)));
            }
        }
        newest.ok_or_else(|| fail("directory is empty".to_string()))?
    } else {
        meta.modified().map_err(|e| fail(e.to_string()))?
    };

    let age = SystemTime::now()
        .duration_since(newest)
        .unwrap_or_default();
    if age > max_age {
        return Err(fail(format!(
            "last modified {}s ago, limit {}s",
            age.as_secs(),
            max_age.as_secs()
        )));
    }
    Ok(())
}
