//! Production wiring: collaborators built from a `FleetConfig`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use fleet_autoscale::{ReplicaLedger, ScaleCallback, ScaleFuture};
use fleet_control::{CycleSettings, Orchestrator};
use fleet_core::{FleetConfig, InventoryFuture, InventoryProvider, ServiceSpec};
use fleet_health::HealthEvaluator;
use fleet_metrics::{HttpMetricSource, MetricSource, StaticMetricSource};
use fleet_report::{FleetReport, render_prometheus};
use fleet_state::StateStore;

/// Inventory from config, with replica counts overlaid from the ledger so
/// the next cycle decides from what was actually applied.
pub struct TrackedInventory {
    services: Vec<ServiceSpec>,
    ledger: Arc<ReplicaLedger>,
}

impl TrackedInventory {
    pub fn new(services: Vec<ServiceSpec>, ledger: Arc<ReplicaLedger>) -> Self {
        Self { services, ledger }
    }
}

impl InventoryProvider for TrackedInventory {
    fn list_services(&self) -> InventoryFuture<'_> {
        Box::pin(async move {
            let applied = self.ledger.snapshot().await;
            Ok(self
                .services
                .iter()
                .cloned()
                .map(|mut spec| {
                    if let Some(replicas) = applied.get(&spec.name) {
                        spec.replicas = *replicas;
                    }
                    spec
                })
                .collect())
        })
    }
}

/// Run `<program> [args..] <service> <replicas>` for every replica change.
pub fn command_callback(command: &str) -> anyhow::Result<ScaleCallback> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next().context("empty scale command")?;
    let args: Vec<String> = parts.collect();

    Ok(Box::new(move |service: &str, replicas: u32| -> ScaleFuture {
        let program = program.clone();
        let args = args.clone();
        let service = service.to_string();
        Box::pin(async move {
            debug!(%program, %service, replicas, "running scale command");
            let status = tokio::process::Command::new(&program)
                .args(&args)
                .arg(&service)
                .arg(replicas.to_string())
                .kill_on_drop(true)
                .status()
                .await
                .with_context(|| format!("failed to spawn {program}"))?;
            if !status.success() {
                anyhow::bail!("{program} exited with {status}");
            }
            Ok(())
        })
    }))
}

/// Where metrics come from and how scaling is actuated.
#[derive(Debug, Clone, Default)]
pub struct Collaborators {
    pub metrics_file: Option<PathBuf>,
    pub scale_command: Option<String>,
}

/// Build the orchestrator the daemon runs.
pub fn build_orchestrator(
    config: &FleetConfig,
    state: StateStore,
    collaborators: &Collaborators,
) -> anyhow::Result<Orchestrator> {
    let metrics: Arc<dyn MetricSource> = match &collaborators.metrics_file {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read metrics file {}", path.display()))?;
            info!(path = %path.display(), "using fixed metric samples");
            Arc::new(StaticMetricSource::from_json(&json)?)
        }
        None => Arc::new(HttpMetricSource::from_services(&config.services)),
    };

    let applied = state.applied_replicas()?;
    if !applied.is_empty() {
        info!(services = applied.len(), "resuming from applied replica counts");
    }
    let mut ledger = ReplicaLedger::new().with_replicas(applied);
    match &collaborators.scale_command {
        Some(command) => {
            ledger = ledger.with_scale_fn(command_callback(command)?);
            info!(%command, "scale command configured");
        }
        None => info!("no scale command configured, scaling is dry-run"),
    }
    let ledger = Arc::new(ledger);

    let inventory = Arc::new(TrackedInventory::new(config.services.clone(), Arc::clone(&ledger)));
    let health = HealthEvaluator::from_config(&config.health, config.control.check_timeout());
    info!(
        services = config.services.len(),
        checks = health.check_names().len(),
        "orchestrator wired"
    );

    Ok(Orchestrator::new(state, inventory, metrics, ledger)
        .with_health(health)
        .with_settings(CycleSettings::from_config(config)))
}

/// Write `report.json` and `fleet.prom` into `dir`, replacing both
/// atomically.
pub fn write_reports(dir: &Path, report: &FleetReport) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    replace_file(&dir.join("report.json"), report.to_json_pretty()?.as_bytes())?;
    replace_file(&dir.join("fleet.prom"), render_prometheus(report).as_bytes())?;
    Ok(())
}

fn replace_file(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_autoscale::{ScalerExecutor, decide};
    use fleet_core::{HealthSection, MetricSample, ResourceRequest, ScalingBounds};

    fn spec(name: &str, replicas: u32) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            replicas,
            version: "1.0.0".to_string(),
            health_path: "/healthz".to_string(),
            metrics_path: "/metrics.json".to_string(),
            resources: ResourceRequest {
                cpu_millis: 100,
                memory_mib: 128,
            },
        }
    }

    #[tokio::test]
    async fn tracked_inventory_reflects_applied_replicas() {
        let ledger = Arc::new(ReplicaLedger::new());
        let inventory = TrackedInventory::new(vec![spec("api", 2), spec("web", 4)], Arc::clone(&ledger));

        let decision = decide(
            &spec("api", 2),
            &MetricSample::new(95.0, 20.0, 1.0, 1.0),
            &ScalingBounds::default(),
        );
        ledger.apply(&decision).await.unwrap();

        let listed = inventory.list_services().await.unwrap();
        assert_eq!(listed[0].replicas, 3);
        assert_eq!(listed[1].replicas, 4);
    }

    #[test]
    fn empty_scale_command_is_rejected() {
        assert!(command_callback("   ").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn scale_command_exit_status_is_checked() {
        let ok = command_callback("true").unwrap();
        assert!(ok("api", 3).await.is_ok());

        let failing = command_callback("false").unwrap();
        let err = failing("api", 3).await.unwrap_err();
        assert!(err.to_string().contains("false exited"));
    }

    #[test]
    fn metrics_file_feeds_static_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(
            &path,
            r#"{"api":{"cpu_percent":10.0,"memory_percent":20.0,"request_rate":5.0,"response_time_ms":40.0}}"#,
        )
        .unwrap();
        let config = FleetConfig {
            services: vec![spec("api", 2)],
            ..Default::default()
        };
        let collaborators = Collaborators {
            metrics_file: Some(path),
            scale_command: None,
        };
        let orch = build_orchestrator(&config, StateStore::open_in_memory().unwrap(), &collaborators);
        assert!(orch.is_ok());

        let missing = Collaborators {
            metrics_file: Some(dir.path().join("nope.json")),
            scale_command: None,
        };
        assert!(build_orchestrator(&config, StateStore::open_in_memory().unwrap(), &missing).is_err());
    }

    #[tokio::test]
    async fn restart_resumes_from_applied_replicas() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = dir.path().join("metrics.json");
        std::fs::write(
            &metrics,
            r#"{"api":{"cpu_percent":90.0,"memory_percent":20.0,"request_rate":5.0,"response_time_ms":40.0}}"#,
        )
        .unwrap();
        let config = FleetConfig {
            services: vec![spec("api", 2)],
            health: HealthSection {
                checks: Vec::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        let collaborators = Collaborators {
            metrics_file: Some(metrics),
            scale_command: None,
        };
        let db_path = dir.path().join("fleet.redb");

        let mut seen = Vec::new();
        for _ in 0..2 {
            let state = StateStore::open(&db_path).unwrap();
            let orch = build_orchestrator(&config, state, &collaborators).unwrap();
            let (_tx, rx) = tokio::sync::watch::channel(false);
            let outcome = orch.run_cycle(rx).await.unwrap();
            let decision = &outcome.report.scaling.decisions[0];
            seen.push((decision.previous_replicas(), decision.proposed_replicas()));
        }

        assert_eq!(seen, vec![(2, 3), (3, 4)]);
    }

    #[test]
    fn reports_are_written_side_by_side() {
        let dir = tempfile::tempdir().unwrap();
        let report = fleet_report::build(&[], &[], &[]);
        write_reports(dir.path(), &report).unwrap();

        let json = std::fs::read_to_string(dir.path().join("report.json")).unwrap();
        assert!(json.contains("\"recommendations\""));
        let prom = std::fs::read_to_string(dir.path().join("fleet.prom")).unwrap();
        assert!(prom.contains("# TYPE fleet_health_score gauge"));
        assert!(!dir.path().join("report.tmp").exists());
    }
}
