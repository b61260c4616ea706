//! alertruled — the alert rule operator daemon.
//!
//! Single binary that assembles the operator:
//! - Object store (redb)
//! - Workload and AlertRule reconcilers
//! - Resync driver
//! - REST API + probes
//!
//! # Usage
//!
//! ```text
//! alertruled run --config /etc/alertrule-operator.toml --data-dir /var/lib/alertrule-operator
//! alertruled render --file rule.json --format config-map
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use alertrule_controller::{Driver, RuleRenderer, encode_rule_file};
use alertrule_core::{ArtifactFormat, LogFormat, OperatorConfig};
use alertrule_state::{AlertRuleShape, StateStore};

#[derive(Parser)]
#[command(name = "alertruled", about = "Alert rule operator daemon")]
struct Cli {
    /// Path to the operator config file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconcilers and the API server.
    Run {
        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Port the API listens on.
        #[arg(long)]
        port: Option<u16>,

        /// Resync interval, e.g. "30s".
        #[arg(long)]
        resync_interval: Option<String>,
    },

    /// Print the artifact an AlertRule spec renders to.
    Render {
        /// JSON file holding the AlertRule spec.
        #[arg(long)]
        file: PathBuf,

        /// AlertRule name used for the group.
        #[arg(long, default_value = "alertrule")]
        name: String,

        /// Artifact format; defaults to the configured one.
        #[arg(long)]
        format: Option<ArtifactFormat>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => OperatorConfig::from_file(path)?,
        None => OperatorConfig::default(),
    };

    match cli.command {
        Command::Run {
            data_dir,
            port,
            resync_interval,
        } => {
            if let Some(data_dir) = data_dir {
                config.store.data_dir = data_dir;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(interval) = resync_interval {
                config.controller.resync_interval = interval;
            }
            config.validate()?;
            init_tracing(&config);
            run(config).await
        }
        Command::Render { file, name, format } => {
            if let Some(format) = format {
                config.artifact.format = format;
            }
            config.validate()?;
            render(&config, &file, &name)
        }
    }
}

fn init_tracing(config: &OperatorConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    info!(
        identity = %config.operator.identity,
        format = ?config.artifact.format,
        "alert rule operator starting"
    );

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.store.data_dir)
        .with_context(|| format!("create {}", config.store.data_dir.display()))?;
    let db_path = config.store.data_dir.join("alertrules.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let interval = config.resync_interval()?;
    let mut driver = Driver::from_config(&config, Arc::new(store.clone()))?;
    info!(interval_secs = interval.as_secs(), "reconcilers initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let driver_handle = tokio::spawn(async move {
        driver.run(interval, shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = alertrule_api::build_router(store);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = driver_handle.await;

    info!("alert rule operator stopped");
    Ok(())
}

fn render(config: &OperatorConfig, file: &Path, name: &str) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let shape: AlertRuleShape =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", file.display()))?;

    let document = RuleRenderer::from_config(config)?.render(name, &shape)?;
    match config.artifact.format {
        ArtifactFormat::RuleGroup => println!("{}", serde_json::to_string_pretty(&document)?),
        ArtifactFormat::ConfigMap => print!("{}", encode_rule_file(&document)),
    }
    Ok(())
}
