//! burstgridd — the BurstGrid daemon.
//!
//! Single binary that assembles the BurstGrid subsystems:
//! - State store (redb)
//! - Simulated capacity platform (provisioner loop)
//! - Capacity controller + readiness poller
//! - Staged media executor
//! - Workflow orchestrator, with recovery of interrupted executions
//! - REST API
//!
//! # Usage
//!
//! ```text
//! burstgridd run --config burstgrid.toml --port 8480 --data-dir /var/lib/burstgrid
//! burstgridd config --config burstgrid.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use burstgrid_capacity::{CapacityController, Provisioner, StoreCapacityBackend};
use burstgrid_core::BurstConfig;
use burstgrid_executor::StagedExecutor;
use burstgrid_state::StateStore;
use burstgrid_workflow::{Orchestrator, WorkflowConfig};

#[derive(Parser)]
#[command(name = "burstgridd", about = "BurstGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: API server, provisioner, and orchestrator.
    Run {
        /// Path to burstgrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `server.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,burstgridd=debug,burstgrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            run(config).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BurstConfig> {
    match path {
        Some(path) => BurstConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => {
            let config = BurstConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn run(config: BurstConfig) -> anyhow::Result<()> {
    info!("BurstGrid daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("burstgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Simulated capacity platform.
    let provisioner = Provisioner::new(state.clone(), config.provisioning_delay()?);
    let provisioner_interval = config.provisioner_interval()?;

    // Capacity controller.
    let controller = CapacityController::new(Arc::new(StoreCapacityBackend::new(state.clone())));

    // Executor.
    let executor = StagedExecutor::media_pipeline(config.stage_duration()?);
    info!(stages = ?executor.stage_names(), "executor initialized");

    // Orchestrator.
    let workflow = WorkflowConfig::from_config(&config)?;
    info!(
        pool = %config.pool.id,
        target = %workflow.high_target,
        poll_interval_ms = workflow.poll_interval.as_millis() as u64,
        deadline_s = workflow.deadline.as_secs(),
        "orchestrator initialized"
    );
    let orchestrator = Orchestrator::new(state.clone(), controller, Arc::new(executor), workflow);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let provisioner_handle = tokio::spawn(async move {
        provisioner.run(provisioner_interval, shutdown_rx).await;
    });

    let resumed = orchestrator.recover()?;
    if !resumed.is_empty() {
        warn!(count = resumed.len(), "resumed interrupted executions");
    }

    // ── Start API server ───────────────────────────────────────

    let router = burstgrid_api::build_router(burstgrid_api::ApiState {
        store: state,
        orchestrator,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c, shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = provisioner_handle.await;

    info!("BurstGrid daemon stopped");
    Ok(())
}
