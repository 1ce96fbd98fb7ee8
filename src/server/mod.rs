// Collector server - axum router, shared state and backend selection

pub mod handlers;
pub mod middleware;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use crate::audit::{AuditError, AuditPublisher, FileObserver, HttpObserver};
use crate::config::ServerConfig;
use crate::retry::RetryPolicy;
use crate::service::MetricsService;
use crate::storage::{FileBackedStore, MemoryStore, PersistPolicy, PostgresStore, Store};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MetricsService>,
    pub store: Arc<dyn Store>,
    /// Shared secret for request verification and response signing
    pub key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: Arc<MetricsService>, key: Option<&str>) -> Self {
        AppState {
            store: Arc::clone(service.store()),
            service,
            key: key.map(Arc::from),
        }
    }
}

/// Builds the HTTP router
///
/// Layers run outermost first: request logging, response compression,
/// request decompression, then signature verification on the plain body.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::list_metrics))
        .route("/ping", get(handlers::ping))
        .route("/update", post(handlers::update_json))
        .route("/update/", post(handlers::update_json))
        .route("/update/:kind/:name/:value", post(handlers::update_path))
        .route("/updates/", post(handlers::update_batch))
        .route("/value", post(handlers::value_json))
        .route("/value/", post(handlers::value_json))
        .route("/value/:kind/:name", get(handlers::value_path))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::verify_signature,
        ))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .with_state(state)
}

/// The backend picked at startup plus the handles the entry point must drive
pub struct StoreSetup {
    pub store: Arc<dyn Store>,
    /// Present when metrics are snapshotted to a file
    pub file_store: Option<Arc<FileBackedStore>>,
    pub database: Option<Arc<PostgresStore>>,
}

/// Selects the storage backend
///
/// PostgreSQL when a DSN is configured and reachable; otherwise the memory
/// store, wrapped for file persistence when a path is configured.
pub async fn select_store(config: &ServerConfig, cancel: &CancellationToken) -> StoreSetup {
    if let Some(dsn) = &config.database_dsn {
        match PostgresStore::connect(dsn).await {
            Ok(store) => {
                info!("Using PostgreSQL storage");
                let store = Arc::new(store.with_retry(RetryPolicy::default(), cancel.clone()));
                return StoreSetup {
                    store: store.clone(),
                    file_store: None,
                    database: Some(store),
                };
            }
            Err(e) => warn!(
                error = %e,
                "Database unavailable, falling back to in-memory storage"
            ),
        }
    }

    let memory: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let Some(path) = &config.file_storage_path else {
        info!("Using in-memory storage without persistence");
        return StoreSetup {
            store: memory,
            file_store: None,
            database: None,
        };
    };

    let policy = PersistPolicy::from_interval(config.store_interval);
    let file_store = Arc::new(FileBackedStore::new(memory, path.clone(), policy));
    info!(path = %path.display(), ?policy, "Using in-memory storage with file snapshots");

    if config.restore {
        match file_store.restore().await {
            Ok(()) => info!(path = %path.display(), "Metrics restored"),
            Err(e) => warn!(error = %e, "Failed to restore metrics, starting empty"),
        }
    }

    StoreSetup {
        store: file_store.clone(),
        file_store: Some(file_store),
        database: None,
    }
}

/// Wires the configured audit observers
///
/// # Returns
/// * `Ok(None)` - No audit destination configured
/// * `Ok(Some(publisher))` - Publisher with one observer per destination
pub fn build_audit(config: &ServerConfig) -> Result<Option<Arc<AuditPublisher>>, AuditError> {
    if config.audit_file.is_none() && config.audit_url.is_none() {
        return Ok(None);
    }

    let publisher = AuditPublisher::default();

    if let Some(path) = &config.audit_file {
        info!(path = %path.display(), "Audit events written to file");
        publisher.subscribe(Arc::new(FileObserver::new(path.clone())));
    }
    if let Some(url) = &config.audit_url {
        info!(url = %url, "Audit events posted to URL");
        publisher.subscribe(Arc::new(HttpObserver::new(url.clone())?));
    }

    Ok(Some(Arc::new(publisher)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            address: "localhost:0".to_string(),
            store_interval: 0,
            file_storage_path: None,
            restore: true,
            database_dsn: None,
            key: None,
            audit_file: None,
            audit_url: None,
        }
    }

    #[tokio::test]
    async fn test_plain_memory_without_path() {
        let setup = select_store(&config(), &CancellationToken::new()).await;
        assert_eq!(setup.store.backend(), "memory");
        assert!(setup.file_store.is_none());
        assert!(setup.database.is_none());
    }

    #[tokio::test]
    async fn test_file_store_restores_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let seed = MemoryStore::new();
        seed.update("gauge", "Alloc", "1.5").await.unwrap();
        seed.save_to_file(&path).await.unwrap();

        let mut cfg = config();
        cfg.file_storage_path = Some(path);
        cfg.store_interval = 300;

        let setup = select_store(&cfg, &CancellationToken::new()).await;
        let file_store = setup.file_store.unwrap();
        assert_eq!(file_store.policy(), PersistPolicy::Periodic(std::time::Duration::from_secs(300)));
        assert_eq!(setup.store.get_gauge("Alloc").await.unwrap(), Some(1.5));
    }

    #[tokio::test]
    async fn test_unreachable_database_falls_back() {
        let mut cfg = config();
        cfg.database_dsn = Some("postgres://user:pw@127.0.0.1:1/metrics".to_string());

        let setup = select_store(&cfg, &CancellationToken::new()).await;
        assert!(setup.database.is_none());
        assert_eq!(setup.store.backend(), "memory");
    }

    #[test]
    fn test_audit_only_when_configured() {
        assert!(build_audit(&config()).unwrap().is_none());

        let mut cfg = config();
        cfg.audit_file = Some("/tmp/audit.log".into());
        let publisher = build_audit(&cfg).unwrap().unwrap();
        assert!(publisher.has_observers());
    }
}
