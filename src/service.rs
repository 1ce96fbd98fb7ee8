// Metrics service - validation and commit protocol between HTTP and storage
//
// Every write is validated in full before the store is touched. Batches use the
// store's atomic capability when it has one and fall back to sequential
// updates otherwise. Audit observers hear only about committed writes.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::audit::{AuditEvent, AuditPublisher};
use crate::model::MetricSample;
use crate::storage::{StorageError, Store};

/// Outcome classes of a rejected write
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The request itself is wrong; maps to 400
    #[error("{0}")]
    Validation(String),

    /// The backend failed; maps to 500
    #[error("failed to store metrics: {0}")]
    Internal(#[source] StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        if err.is_validation() {
            ServiceError::Validation(err.to_string())
        } else {
            ServiceError::Internal(err)
        }
    }
}

/// Accepts validated writes and forwards them to the store
pub struct MetricsService {
    store: Arc<dyn Store>,
    audit: Option<Arc<AuditPublisher>>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn Store>, audit: Option<Arc<AuditPublisher>>) -> Self {
        MetricsService { store, audit }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Commits a batch of samples
    ///
    /// # Arguments
    /// * `samples` - Decoded batch, must not be empty
    /// * `source_ip` - Caller address recorded in the audit event
    ///
    /// # Returns
    /// * `Ok(n)` - Number of samples committed
    /// * `Err(ServiceError::Validation)` - Empty batch or invalid sample, nothing stored
    /// * `Err(ServiceError::Internal)` - Backend failure
    #[instrument(skip_all, fields(samples = samples.len(), source_ip = %source_ip))]
    pub async fn update_batch(
        &self,
        samples: &[MetricSample],
        source_ip: &str,
    ) -> Result<usize, ServiceError> {
        if samples.is_empty() {
            return Err(ServiceError::Validation("empty batch".to_string()));
        }

        for sample in samples {
            validate(sample)?;
        }

        match self.store.as_batch() {
            Some(batch) => batch.update_batch(samples).await?,
            None => {
                warn!(
                    backend = self.store.backend(),
                    "Backend has no batch support, applying samples one by one"
                );
                for sample in samples {
                    let raw = sample
                        .raw_value()
                        .map_err(|e| ServiceError::Validation(e.to_string()))?;
                    self.store
                        .update(sample.kind.as_str(), &sample.id, &raw)
                        .await?;
                }
            }
        }

        info!(count = samples.len(), "Batch committed");
        self.publish(samples.iter().map(|s| s.id.clone()).collect(), source_ip);
        Ok(samples.len())
    }

    /// Commits a single JSON sample
    pub async fn update_sample(
        &self,
        sample: &MetricSample,
        source_ip: &str,
    ) -> Result<(), ServiceError> {
        validate(sample)?;
        let raw = sample
            .raw_value()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        self.store
            .update(sample.kind.as_str(), &sample.id, &raw)
            .await?;

        self.publish(vec![sample.id.clone()], source_ip);
        Ok(())
    }

    /// Commits a plain-text value from the path-encoded API
    pub async fn update_raw(
        &self,
        kind: &str,
        name: &str,
        raw: &str,
        source_ip: &str,
    ) -> Result<(), ServiceError> {
        if name.is_empty() {
            return Err(ServiceError::Validation("metric name is required".to_string()));
        }
        self.store.update(kind, name, raw).await?;

        self.publish(vec![name.to_string()], source_ip);
        Ok(())
    }

    fn publish(&self, metrics: Vec<String>, source_ip: &str) {
        if let Some(audit) = &self.audit {
            audit.publish(AuditEvent::new(metrics, source_ip));
        }
    }
}

fn validate(sample: &MetricSample) -> Result<(), ServiceError> {
    if sample.id.is_empty() {
        return Err(ServiceError::Validation("metric id is required".to_string()));
    }
    sample
        .payload()
        .map(|_| ())
        .map_err(|e| ServiceError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditError, Observer};
    use crate::model::MetricKind;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelObserver {
        tx: mpsc::UnboundedSender<AuditEvent>,
    }

    #[async_trait]
    impl Observer for ChannelObserver {
        fn name(&self) -> &str {
            "channel"
        }

        async fn notify(&self, event: &AuditEvent) -> Result<(), AuditError> {
            let _ = self.tx.send(event.clone());
            Ok(())
        }
    }

    /// Store without the batch capability that counts single updates
    #[derive(Default)]
    struct SequentialStore {
        inner: MemoryStore,
        updates: AtomicUsize,
    }

    #[async_trait]
    impl Store for SequentialStore {
        async fn update(&self, kind: &str, name: &str, raw: &str) -> Result<(), StorageError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update(kind, name, raw).await
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
        fn backend(&self) -> &'static str {
            "sequential"
        }
    }

    fn audited(store: Arc<dyn Store>) -> (MetricsService, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = AuditPublisher::default();
        publisher.subscribe(Arc::new(ChannelObserver { tx }));
        (MetricsService::new(store, Some(Arc::new(publisher))), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<AuditEvent>) -> AuditEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("audit event expected")
            .unwrap()
    }

    #[tokio::test]
    async fn test_batch_commit_publishes_audit() {
        let store = Arc::new(MemoryStore::new());
        let (service, mut rx) = audited(store.clone());

        let batch = vec![
            MetricSample::gauge("Alloc", 123.45),
            MetricSample::counter("PollCount", 7),
        ];
        assert_eq!(service.update_batch(&batch, "10.0.0.1").await.unwrap(), 2);

        assert_eq!(store.get_gauge("Alloc").await.unwrap(), Some(123.45));
        assert_eq!(store.get_counter("PollCount").await.unwrap(), Some(7));

        let event = next_event(&mut rx).await;
        assert_eq!(event.metrics, vec!["Alloc", "PollCount"]);
        assert_eq!(event.ip_address, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected_without_audit() {
        let (service, mut rx) = audited(Arc::new(MemoryStore::new()));

        let err = service.update_batch(&[], "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_sample_leaves_store_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let (service, mut rx) = audited(store.clone());

        let batch = vec![
            MetricSample::gauge("Alloc", 1.0),
            MetricSample {
                id: "PollCount".to_string(),
                kind: MetricKind::Counter,
                delta: None,
                value: None,
            },
        ];
        let err = service.update_batch(&batch, "10.0.0.1").await.unwrap_err();
        assert!(err.to_string().contains("missing delta"), "{err}");

        assert!(store.get_all_gauges().await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sequential_fallback_without_batch_capability() {
        let store = Arc::new(SequentialStore::default());
        let service = MetricsService::new(store.clone(), None);

        let batch = vec![
            MetricSample::gauge("a", 1.0),
            MetricSample::counter("b", 2),
            MetricSample::counter("b", 3),
        ];
        assert_eq!(service.update_batch(&batch, "").await.unwrap(), 3);

        assert_eq!(store.updates.load(Ordering::SeqCst), 3);
        assert_eq!(store.get_counter("b").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_single_updates() {
        let store = Arc::new(MemoryStore::new());
        let (service, mut rx) = audited(store.clone());

        service
            .update_sample(&MetricSample::gauge("g", 2.5), "10.0.0.3")
            .await
            .unwrap();
        assert_eq!(next_event(&mut rx).await.metrics, vec!["g"]);

        service.update_raw("counter", "c", "4", "10.0.0.3").await.unwrap();
        assert_eq!(store.get_counter("c").await.unwrap(), Some(4));

        let err = service.update_raw("counter", "c", "x", "10.0.0.3").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = service.update_raw("timer", "c", "1", "10.0.0.3").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
