//! Greenroom server binary
//!
//! Wires the engine, spawns the background loops (index manager,
//! consolidation, daily maintenance), and serves the HTTP/WebSocket
//! surface until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use greenroom_server::state::AppState;

/// Daily cadence for archival / optimization / backup
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Parser)]
#[command(name = "greenroom-server", version, about = "Talent-discovery engine server")]
struct Args {
    /// Bind host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Data directory (database, index snapshots, backups).
    /// Defaults to the platform data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON (for log shippers)
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    info!("Greenroom server v{} starting", env!("CARGO_PKG_VERSION"));

    let config = greenroom_core::EngineConfig::from_env();
    let state = AppState::build(args.data_dir.clone(), config.clone())?;

    // Recovery: a missing/empty index snapshot with profiles on disk
    // means the derived view was lost - rebuild it from the store.
    {
        let index_empty = state
            .index
            .read()
            .map(|i| i.stats().count == 0)
            .unwrap_or(true);
        let profile_count = state.store.profile_count().unwrap_or(0);
        if index_empty && profile_count > 0 {
            info!(profile_count, "index snapshot missing, rebuilding from profile store");
            let maintenance = state.maintenance.clone();
            tokio::spawn(async move {
                if let Err(e) = maintenance.reindex_all().await {
                    error!("startup reindex failed: {}", e);
                }
            });
        }
    }

    // Shutdown signal shared by every background loop
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Index manager drain loop
    tokio::spawn(
        state
            .indexer
            .clone()
            .run(config.index_interval, shutdown_rx.clone()),
    );

    // Consolidation loop
    tokio::spawn(
        state
            .consolidation
            .clone()
            .run(config.consolidation_interval, shutdown_rx.clone()),
    );

    // Daily maintenance: archival, optimization, backup
    {
        let maintenance = state.maintenance.clone();
        let backup_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("backups");
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
                if let Err(e) = maintenance.archive_inactive() {
                    warn!("archival failed: {}", e);
                }
                if let Err(e) = maintenance.optimize() {
                    warn!("index optimization failed: {}", e);
                }
                if let Err(e) = maintenance.backup(&backup_dir) {
                    warn!("backup failed: {}", e);
                }
            }
        });
    }

    let app = greenroom_server::app(state);
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = serve.await {
        error!("server error: {}", e);
    }

    // Stop background loops deterministically
    let _ = shutdown_tx.send(true);
    info!("Greenroom server shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
