//! vmgridd: the VMGrid daemon.
//!
//! Assembles the reservation store, provider agents, lifecycle engine,
//! task workers and REST API into one process.
//!
//! # Usage
//!
//! ```text
//! vmgridd serve --config /etc/vmgrid/vmgrid.toml --port 8450
//! vmgridd run prepare --params request.json --blocking
//! vmgridd config
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use vmgrid_agent::AgentFactory;
use vmgrid_core::{parse_parameters, ManagerConfig, StoreConfig};
use vmgrid_engine::{ExecutionMode, LifecycleEngine, TaskQueue, TaskWorkers};
use vmgrid_state::{ReservationStore, StateStore};

#[derive(Parser)]
#[command(name = "vmgridd", about = "VMGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Run one operation against the configured store and print the response.
    Run {
        operation: RunOperation,

        /// JSON file holding the request parameters.
        #[arg(long)]
        params: PathBuf,

        /// Instance id prefix for `describe`.
        #[arg(long, default_value = "")]
        prefix: String,

        /// Terminate instances on `deregister`.
        #[arg(long)]
        terminate: bool,

        /// Ignore the rate limit on `synchronize`.
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RunOperation {
    Prepare,
    Describe,
    Deregister,
    Status,
    ValidateCredentials,
    Synchronize,
}

#[derive(clap::Args)]
struct Overrides {
    /// Path to vmgrid.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for the redb store.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run pipelines inline instead of on the task workers.
    #[arg(long)]
    blocking: bool,
}

impl Overrides {
    fn load(&self) -> anyhow::Result<ManagerConfig> {
        let mut config = match &self.config {
            Some(path) => ManagerConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ManagerConfig::default(),
        };
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(data_dir) = &self.data_dir {
            config.store = StoreConfig::Redb {
                path: data_dir.join("reservations.redb"),
            };
        }
        if self.blocking {
            config.manager.blocking = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vmgridd=debug,vmgrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { overrides } => serve(overrides.load()?).await,
        Command::Run {
            operation,
            params,
            prefix,
            terminate,
            force,
            overrides,
        } => {
            run_once(overrides.load()?, operation, &params, &prefix, terminate, force).await
        }
        Command::Config { overrides } => {
            print!("{}", overrides.load()?.to_toml_string()?);
            Ok(())
        }
    }
}

async fn serve(config: ManagerConfig) -> anyhow::Result<()> {
    info!(blocking = config.manager.blocking, "VMGrid daemon starting");

    let store: Arc<dyn ReservationStore> = Arc::new(StateStore::from_config(&config.store)?);
    info!(store = ?config.store, "reservation store opened");

    let factory = Arc::new(AgentFactory::with_builtin());
    info!(providers = ?factory.providers(), "agents registered");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Execution mode ─────────────────────────────────────────

    let (mode, workers) = if config.manager.blocking {
        (ExecutionMode::Blocking, None)
    } else {
        let (queue, rx) = TaskQueue::new(config.manager.queue_capacity);
        let workers = TaskWorkers::spawn(config.manager.workers, rx, store.clone(), shutdown_rx);
        (ExecutionMode::NonBlocking(queue), Some(workers))
    };

    let engine = Arc::new(LifecycleEngine::new(
        store,
        factory,
        mode,
        Duration::from_secs(config.reconcile.min_interval_secs),
    ));

    // ── Resume reservations left pending ───────────────────────

    let recovered = engine.resume_pending().await?;
    info!(resumed = recovered.resumed, failed = recovered.failed, "startup recovery complete");

    // ── Start API server ───────────────────────────────────────

    let router = vmgrid_api::build_router(engine);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Workers finish everything already queued before exiting.
    if let Some(workers) = workers {
        workers.join().await;
    }

    info!("VMGrid daemon stopped");
    Ok(())
}

async fn run_once(
    config: ManagerConfig,
    operation: RunOperation,
    params_path: &Path,
    prefix: &str,
    terminate: bool,
    force: bool,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(params_path)
        .with_context(|| format!("reading {}", params_path.display()))?;
    let params = parse_parameters(&raw)?;

    let store: Arc<dyn ReservationStore> = Arc::new(StateStore::from_config(&config.store)?);
    // A one-shot process has no workers, so every pipeline runs inline.
    let engine = LifecycleEngine::new(
        store,
        Arc::new(AgentFactory::with_builtin()),
        ExecutionMode::Blocking,
        Duration::from_secs(config.reconcile.min_interval_secs),
    );

    let response = match operation {
        RunOperation::Prepare => engine.prepare(&params).await?,
        RunOperation::Describe => engine.describe(&params, prefix).await?,
        RunOperation::Deregister => engine.deregister(&params, terminate).await?,
        RunOperation::Status => engine.status(&params).await?,
        RunOperation::ValidateCredentials => engine.validate_credentials(&params).await?,
        RunOperation::Synchronize => engine.synchronize(&params, force).await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
