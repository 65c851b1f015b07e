//! fleetd — the fleet control daemon.
//!
//! Single binary that assembles the control loop:
//! - State store (redb)
//! - Inventory (from config)
//! - Metric source (HTTP, or a fixed JSON file)
//! - Health evaluator
//! - Replica ledger + optional scale command
//!
//! # Usage
//!
//! ```text
//! fleetd run --config fleet.toml --data-dir /var/lib/fleetd --report-dir /var/lib/fleetd/report
//! fleetd once --config fleet.toml --metrics-file samples.json
//! fleetd status --data-dir /var/lib/fleetd
//! ```

mod wiring;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use fleet_control::Orchestrator;
use fleet_core::FleetConfig;
use fleet_state::StateStore;

use wiring::Collaborators;

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet health and autoscaling daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CycleArgs {
    /// Fleet configuration file.
    #[arg(long, default_value = "fleet.toml")]
    config: PathBuf,

    /// Data directory for persistent state.
    #[arg(long, default_value = "/var/lib/fleetd")]
    data_dir: PathBuf,

    /// Read metric samples from a JSON file instead of the services.
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Command run as `<cmd> <service> <replicas>` to apply scaling.
    #[arg(long)]
    scale_command: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop until interrupted.
    Run {
        #[command(flatten)]
        cycle: CycleArgs,

        /// Directory receiving report.json and fleet.prom after each cycle.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Run a single cycle and print the report.
    Once {
        #[command(flatten)]
        cycle: CycleArgs,
    },
    /// Show the latest status of every component.
    Status {
        #[arg(long, default_value = "/var/lib/fleetd")]
        data_dir: PathBuf,
    },
    /// Print state history as `component|status|timestamp|detail`.
    History {
        #[arg(long, default_value = "/var/lib/fleetd")]
        data_dir: PathBuf,

        /// Only the most recent N records.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Drop all but the most recent state records.
    Compact {
        #[arg(long, default_value = "/var/lib/fleetd")]
        data_dir: PathBuf,

        #[arg(long)]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { cycle, report_dir } => run_loop(cycle, report_dir).await,
        Command::Once { cycle } => run_once(cycle).await,
        Command::Status { data_dir } => show_status(&data_dir),
        Command::History { data_dir, tail } => show_history(&data_dir, tail),
        Command::Compact { data_dir, keep } => compact(&data_dir, keep),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleet=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_state(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let db_path = data_dir.join("fleet.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

fn assemble(args: &CycleArgs) -> anyhow::Result<(FleetConfig, Orchestrator)> {
    let config = FleetConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let state = open_state(&args.data_dir)?;
    let collaborators = Collaborators {
        metrics_file: args.metrics_file.clone(),
        scale_command: args.scale_command.clone(),
    };
    let orch = wiring::build_orchestrator(&config, state, &collaborators)?;
    Ok((config, orch))
}

async fn run_loop(args: CycleArgs, report_dir: Option<PathBuf>) -> anyhow::Result<()> {
    info!("fleet daemon starting");
    let (config, orch) = assemble(&args)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
        let _ = shutdown_tx.send(true);
    });

    // ── Control loop ───────────────────────────────────────────

    orch.run(config.control.interval(), shutdown_rx, |outcome| {
        info!(
            status = %outcome.status,
            progress = outcome.progress,
            score = outcome.report.health.score,
            "cycle reported"
        );
        if let Some(dir) = &report_dir
            && let Err(e) = wiring::write_reports(dir, &outcome.report)
        {
            warn!(dir = %dir.display(), error = %e, "failed to write report");
        }
    })
    .await;

    info!("fleet daemon stopped");
    Ok(())
}

async fn run_once(args: CycleArgs) -> anyhow::Result<()> {
    let (_, orch) = assemble(&args)?;
    let (_never_tx, never_rx) = watch::channel(false);

    let outcome = orch.run_cycle(never_rx).await?;
    println!("{}", outcome.report.to_json_pretty()?);
    info!(status = %outcome.status, progress = outcome.progress, "cycle finished");
    Ok(())
}

fn show_status(data_dir: &Path) -> anyhow::Result<()> {
    let state = open_state(data_dir)?;
    for record in state.current_statuses()? {
        println!("{record}");
    }
    println!("progress|{}", state.progress()?);
    Ok(())
}

fn show_history(data_dir: &Path, tail: Option<usize>) -> anyhow::Result<()> {
    let state = open_state(data_dir)?;
    let records = match tail {
        Some(n) => state.tail(n)?,
        None => state.history()?,
    };
    for record in records {
        println!("{record}");
    }
    Ok(())
}

fn compact(data_dir: &Path, keep: usize) -> anyhow::Result<()> {
    let state = open_state(data_dir)?;
    let removed = state.compact(keep)?;
    println!("removed {removed} records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn once_takes_cycle_flags() {
        let cli = Cli::try_parse_from([
            "fleetd",
            "once",
            "--config",
            "fleet.example.toml",
            "--metrics-file",
            "samples.json",
        ])
        .unwrap();
        match cli.command {
            Command::Once { cycle } => {
                assert_eq!(cycle.config, PathBuf::from("fleet.example.toml"));
                assert_eq!(cycle.data_dir, PathBuf::from("/var/lib/fleetd"));
                assert_eq!(cycle.metrics_file, Some(PathBuf::from("samples.json")));
                assert!(cycle.scale_command.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn log_json_is_global() {
        let cli = Cli::try_parse_from(["fleetd", "status", "--log-json"]).unwrap();
        assert!(cli.log_json);
    }

    #[test]
    fn compact_requires_keep() {
        assert!(Cli::try_parse_from(["fleetd", "compact"]).is_err());
    }

    #[test]
    fn history_reads_back_saved_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let state = open_state(dir.path()).unwrap();
            state.save("discovery", fleet_state::Status::Completed, "2 services").unwrap();
        }
        assert!(show_history(dir.path(), Some(5)).is_ok());
        assert!(show_status(dir.path()).is_ok());
    }
}
