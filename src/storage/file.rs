// File-backed store - persistence decorator over another Store
//
// The policy is fixed at construction: either a snapshot after every write, or
// a background timer plus one final snapshot on shutdown. Never both.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{BatchStore, Store, StorageError};
use crate::model::MetricSample;

/// When the snapshot file is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPolicy {
    /// After every successful `update`/`update_batch`
    Synchronous,
    /// On a background timer, plus once on shutdown
    Periodic(Duration),
}

impl PersistPolicy {
    /// Maps a store interval in seconds to a policy; zero means synchronous.
    pub fn from_interval(seconds: u64) -> Self {
        if seconds == 0 {
            PersistPolicy::Synchronous
        } else {
            PersistPolicy::Periodic(Duration::from_secs(seconds))
        }
    }
}

/// Store decorator that snapshots the wrapped store to a JSON file
pub struct FileBackedStore {
    inner: Arc<dyn Store>,
    path: PathBuf,
    policy: PersistPolicy,
}

impl FileBackedStore {
    /// Wraps `inner`, persisting it to `path` according to `policy`
    pub fn new(inner: Arc<dyn Store>, path: impl Into<PathBuf>, policy: PersistPolicy) -> Self {
        FileBackedStore {
            inner,
            path: path.into(),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> PersistPolicy {
        self.policy
    }

    /// Hydrates the wrapped store from the snapshot file
    pub async fn restore(&self) -> Result<(), StorageError> {
        self.inner.load_from_file(&self.path).await
    }

    /// Writes the snapshot file now
    pub async fn persist(&self) -> Result<(), StorageError> {
        self.inner.save_to_file(&self.path).await
    }

    /// Saves after a write in synchronous mode. Failures are logged only.
    ///
    /// The save takes its own lock, so a concurrent write may land between
    /// the update and the snapshot.
    async fn persist_after_write(&self) {
        if self.policy != PersistPolicy::Synchronous {
            return;
        }
        if let Err(e) = self.persist().await {
            error!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist store after write"
            );
        }
    }

    /// Starts the periodic saver for `PersistPolicy::Periodic`
    ///
    /// The task saves on every tick and once more when `cancel` fires, then
    /// exits. Returns `None` for the synchronous policy.
    ///
    /// # Arguments
    /// * `cancel` - Shutdown signal; triggers the final save
    ///
    /// # Returns
    /// * `Some(JoinHandle)` - Handle to await the final save
    /// * `None` - Synchronous policy, nothing to schedule
    pub fn spawn_periodic_save(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let PersistPolicy::Periodic(period) = self.policy else {
            return None;
        };

        let store = Arc::clone(self);
        Some(tokio::spawn(async move {
            info!(
                path = %store.path.display(),
                interval_s = period.as_secs(),
                "Periodic snapshot task started"
            );

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.persist().await {
                            error!(path = %store.path.display(), error = %e, "Periodic snapshot failed");
                        }
                    }
                }
            }

            match store.persist().await {
                Ok(()) => info!(path = %store.path.display(), "Final snapshot saved"),
                Err(e) => error!(path = %store.path.display(), error = %e, "Final snapshot failed"),
            }
        }))
    }
}

#[async_trait]
impl Store for FileBackedStore {
    async fn update(&self, kind: &str, name: &str, raw: &str) -> Result<(), StorageError> {
        self.inner.update(kind, name, raw).await?;
        self.persist_after_write().await;
        Ok(())
    }

    async fn get_gauge(&self, name: &str) -> Result<Option<f64>, StorageError> {
        self.inner.get_gauge(name).await
    }

    async fn get_counter(&self, name: &str) -> Result<Option<i64>, StorageError> {
        self.inner.get_counter(name).await
    }

    async fn get_all_gauges(&self) -> Result<HashMap<String, f64>, StorageError> {
        self.inner.get_all_gauges().await
    }

    async fn get_all_counters(&self) -> Result<HashMap<String, i64>, StorageError> {
        self.inner.get_all_counters().await
    }

    async fn save_to_file(&self, path: &Path) -> Result<(), StorageError> {
        self.inner.save_to_file(path).await
    }

    async fn load_from_file(&self, path: &Path) -> Result<(), StorageError> {
        self.inner.load_from_file(path).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.inner.ping().await
    }

    fn backend(&self) -> &'static str {
        "file"
    }

    fn as_batch(&self) -> Option<&dyn BatchStore> {
        self.inner.as_batch().map(|_| self as &dyn BatchStore)
    }
}

#[async_trait]
impl BatchStore for FileBackedStore {
    async fn update_batch(&self, samples: &[MetricSample]) -> Result<(), StorageError> {
        let batch = self.inner.as_batch().ok_or(StorageError::NotSupported {
            op: "update_batch",
            backend: self.inner.backend(),
        })?;
        batch.update_batch(samples).await?;
        self.persist_after_write().await;
        Ok(())
    }
}
