//! eckWMS relay server binary.

use clap::Parser;
use eckwms_relay::{config, scheduler, server, storage};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eckwms-relay", about = "eckWMS scan buffering relay server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
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

    if cfg.admin_token.is_none() {
        tracing::warn!("No admin_token configured, admin API disabled");
    }

    tracing::info!("Starting eckWMS relay on {}", cfg.listen_addr);

    let storage = storage::RelayStorage::open(&cfg.storage_path)?;
    let retention = scheduler::spawn_retention_task(
        storage.clone(),
        cfg.retention_policy(),
        cfg.retention_schedule(),
    );

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    let app = server::build_router(server::AppState::new(storage, cfg));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await?;

    retention.abort();
    Ok(())
}
