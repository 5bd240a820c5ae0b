//! NotiSync Relay Server
//!
//! Hosts persistent WebSocket connections for every device of a user and
//! keeps their notification read state in step. Notification content lives
//! in the notification store; the relay only tracks what each device was
//! last told.

mod cleanup;
mod config;
mod error;
mod handlers;
mod rate_limit;
mod server;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "notisync-relay", about = "Notification sync relay server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "notisync.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override (`:memory:` keeps everything in process)
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        config::RelayConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        config::RelayConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }

    tracing::info!(
        listen_addr = %cfg.listen_addr,
        storage = %cfg.storage_path.display(),
        "Starting notisync relay"
    );

    let listen_addr = cfg.listen_addr.clone();
    let cleanup_every = Duration::from_secs(cfg.cleanup_interval_secs.max(1));
    let validate_every = Duration::from_secs(cfg.validation_interval_secs.max(1));

    let state = server::AppState::open(cfg)?;
    cleanup::spawn_maintenance_tasks(state.maintenance.clone(), cleanup_every, validate_every);
    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
