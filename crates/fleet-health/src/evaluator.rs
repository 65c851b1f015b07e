//! Health evaluator — runs the configured battery against the fleet.
//!
//! Every check runs in its own task, bounded by the per-check timeout, so a
//! slow, failing, or panicking check cannot prevent the others from
//! producing a result. Per-service checks fan out once more, one task per
//! service. Results come back in configured order.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use fleet_core::{epoch_millis, CheckName, HealthSection, ServiceSpec};

use crate::checker::{CheckError, CheckScope, HealthCheck, HealthCheckResult};
use crate::checks::catalog;

/// Runs a fixed, ordered list of health checks.
#[derive(Clone)]
pub struct HealthEvaluator {
    checks: Vec<Arc<dyn HealthCheck>>,
    timeout: Duration,
}

impl HealthEvaluator {
    /// An evaluator with no checks yet.
    pub fn new(timeout: Duration) -> Self {
        Self {
            checks: Vec::new(),
            timeout,
        }
    }

    /// The battery described by `[health]`.
    pub fn from_config(section: &HealthSection, timeout: Duration) -> Self {
        Self {
            checks: catalog(section),
            timeout,
        }
    }

    /// Append a check to the battery.
    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Names of the configured checks, in order.
    pub fn check_names(&self) -> Vec<CheckName> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check once. Always returns one result per configured check.
    pub async fn evaluate(&self, fleet: &[ServiceSpec]) -> Vec<HealthCheckResult> {
        let fleet: Arc<[ServiceSpec]> = fleet.to_vec().into();

        let handles: Vec<(CheckName, JoinHandle<HealthCheckResult>)> = self
            .checks
            .iter()
            .map(|check| {
                let check = Arc::clone(check);
                let fleet = Arc::clone(&fleet);
                let timeout = self.timeout;
                (check.name(), tokio::spawn(run_check(check, fleet, timeout)))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => failed(name, join_failure(e), Vec::new()),
            };
            if result.passed {
                debug!(check = %result.name, reason = %result.reason, "health check passed");
            } else {
                warn!(check = %result.name, reason = %result.reason, "health check failed");
            }
            results.push(result);
        }
        results
    }
}

async fn run_check(
    check: Arc<dyn HealthCheck>,
    fleet: Arc<[ServiceSpec]>,
    timeout: Duration,
) -> HealthCheckResult {
    let name = check.name();
    match check.scope() {
        CheckScope::Fleet => match bounded(check.probe(None), timeout).await {
            Ok(()) => passed(name, "ok".to_string()),
            Err(e) => failed(name, e, Vec::new()),
        },
        CheckScope::PerService => run_per_service(check, fleet, timeout).await,
    }
}

async fn run_per_service(
    check: Arc<dyn HealthCheck>,
    fleet: Arc<[ServiceSpec]>,
    timeout: Duration,
) -> HealthCheckResult {
    let name = check.name();
    if fleet.is_empty() {
        return passed(name, "no services to check".to_string());
    }

    let handles: Vec<(String, JoinHandle<Result<(), CheckError>>)> = fleet
        .iter()
        .cloned()
        .map(|spec| {
            let check = Arc::clone(&check);
            let service = spec.name.clone();
            let handle = tokio::spawn(async move { bounded(check.probe(Some(&spec)), timeout).await });
            (service, handle)
        })
        .collect();

    let total = handles.len();
    let mut failed_services = Vec::new();
    let mut reasons = Vec::new();
    for (service, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(join_failure(e)),
        };
        if let Err(e) = outcome {
            reasons.push(format!("{service} ({e})"));
            failed_services.push(service);
        }
    }

    if failed_services.is_empty() {
        passed(name, format!("{total}/{total} services passed"))
    } else {
        let reason = format!(
            "{}/{total} services failed: {}",
            failed_services.len(),
            reasons.join("; ")
        );
        failed(name, CheckError::Failed(reason), failed_services)
    }
}

async fn bounded(
    probe: crate::checker::CheckFuture<'_>,
    timeout: Duration,
) -> Result<(), CheckError> {
    match tokio::time::timeout(timeout, probe).await {
        Ok(outcome) => outcome,
        Err(_) => Err(CheckError::Timeout(timeout)),
    }
}

fn passed(name: CheckName, reason: String) -> HealthCheckResult {
    HealthCheckResult {
        name,
        passed: true,
        reason,
        failed_services: Vec::new(),
        timestamp: epoch_millis(),
    }
}

fn failed(name: CheckName, error: CheckError, failed_services: Vec<String>) -> HealthCheckResult {
    HealthCheckResult {
        name,
        passed: false,
        reason: error.to_string(),
        failed_services,
        timestamp: epoch_millis(),
    }
}

/// Turn a task failure (panic or abort) into a check error.
fn join_failure(e: tokio::task::JoinError) -> CheckError {
    if e.is_panic() {
        CheckError::Panicked(panic_message(e.into_panic()))
    } else {
        CheckError::Failed("check task cancelled".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckFuture;
    use fleet_core::ResourceRequest;

    /// Fleet-wide check with a fixed outcome.
    struct Fixed {
        name: CheckName,
        outcome: Result<(), CheckError>,
    }

    impl HealthCheck for Fixed {
        fn name(&self) -> CheckName {
            self.name
        }

        fn probe<'a>(&'a self, _service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
            let outcome = self.outcome.clone();
            Box::pin(async move { outcome })
        }
    }

    struct Panics(CheckName);

    impl HealthCheck for Panics {
        fn name(&self) -> CheckName {
            self.0
        }

        fn probe<'a>(&'a self, _service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
            Box::pin(async move { explode() })
        }
    }

    fn explode() -> Result<(), CheckError> {
        panic!("probe exploded")
    }

    struct Hangs(CheckName);

    impl HealthCheck for Hangs {
        fn name(&self) -> CheckName {
            self.0
        }

        fn probe<'a>(&'a self, _service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        }
    }

    /// Per-service check failing for the named services.
    struct FailsFor(Vec<&'static str>);

    impl HealthCheck for FailsFor {
        fn name(&self) -> CheckName {
            CheckName::ServiceEndpoints
        }

        fn scope(&self) -> CheckScope {
            CheckScope::PerService
        }

        fn probe<'a>(&'a self, service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
            let outcome = match service {
                Some(spec) if self.0.iter().any(|n| *n == spec.name) => {
                    Err(CheckError::Failed("connection refused".into()))
                }
                _ => Ok(()),
            };
            Box::pin(async move { outcome })
        }
    }

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            replicas: 2,
            version: "1.0.0".to_string(),
            health_path: "/healthz".to_string(),
            metrics_path: "/metrics.json".to_string(),
            resources: ResourceRequest {
                cpu_millis: 100,
                memory_mib: 128,
            },
        }
    }

    fn ok(name: CheckName) -> Arc<dyn HealthCheck> {
        Arc::new(Fixed {
            name,
            outcome: Ok(()),
        })
    }

    #[tokio::test]
    async fn one_panicking_check_does_not_hide_the_others() {
        let mut evaluator = HealthEvaluator::new(Duration::from_secs(1));
        for name in CheckName::ALL {
            if name == CheckName::BackupIntegrity {
                evaluator = evaluator.with_check(Arc::new(Panics(name)));
            } else {
                evaluator = evaluator.with_check(ok(name));
            }
        }

        let results = evaluator.evaluate(&[spec("api")]).await;
        assert_eq!(results.len(), 10);
        let names: Vec<CheckName> = results.iter().map(|r| r.name).collect();
        assert_eq!(names, CheckName::ALL.to_vec());

        let backup = &results[8];
        assert_eq!(backup.name, CheckName::BackupIntegrity);
        assert!(!backup.passed);
        assert!(backup.reason.contains("probe exploded"));
        assert_eq!(results.iter().filter(|r| r.passed).count(), 9);
    }

    #[tokio::test]
    async fn error_becomes_failed_result_with_reason() {
        let evaluator = HealthEvaluator::new(Duration::from_secs(1)).with_check(Arc::new(Fixed {
            name: CheckName::Database,
            outcome: Err(CheckError::Failed("connect db:5432: refused".into())),
        }));
        let results = evaluator.evaluate(&[]).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert_eq!(results[0].reason, "connect db:5432: refused");
        assert!(results[0].failed_services.is_empty());
    }

    #[tokio::test]
    async fn slow_check_times_out() {
        let evaluator = HealthEvaluator::new(Duration::from_millis(50))
            .with_check(Arc::new(Hangs(CheckName::Monitoring)))
            .with_check(ok(CheckName::Logging));
        let results = evaluator.evaluate(&[]).await;
        assert!(!results[0].passed);
        assert!(results[0].reason.contains("timed out"));
        assert!(results[1].passed);
    }

    #[tokio::test]
    async fn per_service_check_names_failing_services() {
        let evaluator = HealthEvaluator::new(Duration::from_secs(1))
            .with_check(Arc::new(FailsFor(vec!["worker", "cron"])));
        let fleet = [spec("api"), spec("worker"), spec("cron")];
        let results = evaluator.evaluate(&fleet).await;

        let r = &results[0];
        assert!(!r.passed);
        assert_eq!(r.failed_services, vec!["worker".to_string(), "cron".to_string()]);
        assert!(r.reason.starts_with("2/3 services failed"));
    }

    #[tokio::test]
    async fn per_service_check_passes_when_all_pass() {
        let evaluator =
            HealthEvaluator::new(Duration::from_secs(1)).with_check(Arc::new(FailsFor(vec![])));
        let results = evaluator.evaluate(&[spec("api"), spec("worker")]).await;
        assert!(results[0].passed);
        assert_eq!(results[0].reason, "2/2 services passed");
    }

    #[tokio::test]
    async fn per_service_check_with_empty_fleet_passes() {
        let evaluator =
            HealthEvaluator::new(Duration::from_secs(1)).with_check(Arc::new(FailsFor(vec!["api"])));
        let results = evaluator.evaluate(&[]).await;
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn empty_battery_yields_no_results() {
        let evaluator = HealthEvaluator::new(Duration::from_secs(1));
        assert!(evaluator.evaluate(&[spec("api")]).await.is_empty());
        assert!(evaluator.check_names().is_empty());
    }

    #[tokio::test]
    async fn from_config_runs_policy_against_inventory() {
        let section = HealthSection {
            checks: vec![CheckName::SecurityPolicy],
            probes: Default::default(),
        };
        let evaluator = HealthEvaluator::from_config(&section, Duration::from_secs(1));
        let mut privileged = spec("legacy");
        privileged.port = 80;
        let results = evaluator.evaluate(&[spec("api"), privileged]).await;
        assert!(!results[0].passed);
        assert_eq!(results[0].failed_services, vec!["legacy".to_string()]);
    }
}
