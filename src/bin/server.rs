// Telemetry server - receives and stores metrics from agents
//
// # Usage
// telemetry-server -a localhost:8080 -i 300 -f /tmp/metrics-db.json -r true -d <dsn> -k <secret>
//
// Environment variables ADDRESS, STORE_INTERVAL, FILE_STORAGE_PATH, RESTORE,
// DATABASE_DSN, KEY, AUDIT_FILE and AUDIT_URL override the flags.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use telemetry_pipeline::config::ServerConfig;
use telemetry_pipeline::logging::init_logging;
use telemetry_pipeline::server::{build_audit, build_router, select_store, AppState};
use telemetry_pipeline::service::MetricsService;
use telemetry_pipeline::shutdown::shutdown_signal;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("=== Telemetry Server Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load();
    let cancel = CancellationToken::new();

    let setup = select_store(&config, &cancel).await;
    let saver = setup
        .file_store
        .as_ref()
        .and_then(|store| store.spawn_periodic_save(cancel.clone()));

    let audit = build_audit(&config).context("Failed to configure audit observers")?;
    let service = Arc::new(MetricsService::new(setup.store.clone(), audit));
    let app = build_router(AppState::new(service, config.key.as_deref()));

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    info!(address = %config.address, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")?;

    info!("HTTP server stopped, flushing storage");
    cancel.cancel();

    if let Some(saver) = saver {
        if let Err(e) = saver.await {
            error!("Periodic saver panicked: {}", e);
        }
    } else if let Some(file_store) = &setup.file_store {
        if let Err(e) = file_store.persist().await {
            error!(error = %e, "Final save failed");
        }
    }

    if let Some(database) = &setup.database {
        database.close().await;
    }

    info!("=== Telemetry Server Stopped ===");
    Ok(())
}
