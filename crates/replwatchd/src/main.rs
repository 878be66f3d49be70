//! replwatchd — the replwatch daemon.
//!
//! Single binary that assembles every replwatch subsystem:
//! - State store (redb)
//! - Connection manager (per-endpoint pools, credentials, health)
//! - Discovery, lag sampling, alerting and migrations
//! - Background cycles
//! - REST API + Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! replwatchd --config /etc/replwatch/replwatch.toml --port 8080 --data-dir /var/lib/replwatch
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use replwatch_pg::{
    ConnectionManager, CredentialProvider, EnvCredentialProvider, StaticCredentialProvider,
};
use replwatch_scheduler::AppContext;
use replwatch_state::StateStore;

use crate::config::ReplwatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "replwatchd", about = "PostgreSQL replication monitoring daemon")]
struct Cli {
    /// Configuration file. Missing file means defaults.
    #[arg(long, default_value = "replwatch.toml")]
    config: PathBuf,

    /// Port to listen on (overrides `server.port`).
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for persistent state (overrides `store.data_dir`).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,replwatch=debug"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = ReplwatchConfig::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.store.data_dir = data_dir;
    }
    run(config).await
}

async fn run(config: ReplwatchConfig) -> anyhow::Result<()> {
    info!("replwatch daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.store.data_dir).with_context(|| {
        format!("creating data directory {}", config.store.data_dir.display())
    })?;
    let db_path = config.store.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let provider: Arc<dyn CredentialProvider> = if config.credentials.is_empty() {
        info!("resolving credentials from the environment");
        Arc::new(EnvCredentialProvider::new())
    } else {
        info!(entries = config.credentials.len(), "using credentials from the config file");
        Arc::new(StaticCredentialProvider::new(config.credentials.clone()))
    };
    let connections = Arc::new(ConnectionManager::postgres(
        provider,
        config.connections.clone(),
    ));

    let ctx = Arc::new(AppContext::new(
        store,
        connections,
        config.engine_config(),
    ));
    ctx.prepare()?;
    info!("engines initialized");

    // ── Start background cycles ────────────────────────────────

    let cycles = replwatch_scheduler::start(ctx.clone(), &config.scheduler);

    // ── Start API server ───────────────────────────────────────

    let router = replwatch_api::build_router(ctx);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server.host))?;

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    });

    let served = server.await;

    // Wait for in-flight cycles.
    cycles.shutdown().await;

    served?;
    info!("replwatch daemon stopped");
    Ok(())
}
