// Storage module - the Store contract and its backends
//
// Every backend is used through `Arc<dyn Store>`, so callers never know which
// one they hold. Atomic batch commits are an optional capability exposed
// through `Store::as_batch`.
//
// Backends:
// - `MemoryStore`: authoritative in-process maps behind one RwLock
// - `FileBackedStore`: decorator adding synchronous or periodic JSON snapshots
// - `PostgresStore`: relational upserts with migration bootstrap

pub mod file;
pub mod memory;
pub mod migrations;
pub mod postgres;

pub use file::{FileBackedStore, PersistPolicy};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::num::{ParseFloatError, ParseIntError};
use std::path::Path;
use thiserror::Error;

use crate::model::{MetricSample, SampleError, UnknownKind};
use crate::retry::RetryError;

/// Errors that can occur while reading or writing metrics
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid gauge value: {0}")]
    InvalidGauge(#[source] ParseFloatError),

    /// NaN and infinities have no JSON representation
    #[error("invalid gauge value: {0} is not finite")]
    NonFiniteGauge(String),

    #[error("invalid counter value: {0}")]
    InvalidCounter(#[source] ParseIntError),

    #[error(transparent)]
    UnsupportedKind(#[from] UnknownKind),

    #[error(transparent)]
    InvalidSample(#[from] SampleError),

    #[error("{op} is not supported by the {backend} backend")]
    NotSupported {
        op: &'static str,
        backend: &'static str,
    },

    #[error("snapshot file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database unavailable: {0}")]
    Unavailable(#[source] RetryError<sqlx::Error>),

    #[error("migration failed: {0}")]
    Migration(String),
}

impl StorageError {
    /// True for errors caused by the caller's input rather than the backend
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidGauge(_)
                | StorageError::NonFiniteGauge(_)
                | StorageError::InvalidCounter(_)
                | StorageError::UnsupportedKind(_)
                | StorageError::InvalidSample(_)
        )
    }
}

/// Uniform storage contract shared by all backends
#[async_trait]
pub trait Store: Send + Sync {
    /// Parses `raw` according to `kind` and applies it: gauges are
    /// overwritten, counters accumulate.
    async fn update(&self, kind: &str, name: &str, raw: &str) -> Result<(), StorageError>;

    async fn get_gauge(&self, name: &str) -> Result<Option<f64>, StorageError>;

    async fn get_counter(&self, name: &str) -> Result<Option<i64>, StorageError>;

    /// Returns a copy of every gauge
    async fn get_all_gauges(&self) -> Result<HashMap<String, f64>, StorageError>;

    /// Returns a copy of every counter total
    async fn get_all_counters(&self) -> Result<HashMap<String, i64>, StorageError>;

    async fn save_to_file(&self, path: &Path) -> Result<(), StorageError>;

    async fn load_from_file(&self, path: &Path) -> Result<(), StorageError>;

    /// Liveness probe of the underlying database
    async fn ping(&self) -> Result<(), StorageError> {
        Err(StorageError::NotSupported {
            op: "ping",
            backend: self.backend(),
        })
    }

    /// Short backend name used in logs and errors
    fn backend(&self) -> &'static str;

    /// Narrows to the atomic batch capability, when the backend has it
    fn as_batch(&self) -> Option<&dyn BatchStore> {
        None
    }
}

/// Optional capability: all-or-nothing application of a batch
#[async_trait]
pub trait BatchStore: Store {
    /// Validates every sample, then applies all of them or none.
    async fn update_batch(&self, samples: &[MetricSample]) -> Result<(), StorageError>;
}
