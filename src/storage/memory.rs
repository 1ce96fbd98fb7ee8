// In-memory store - the authoritative maps of gauges and counters

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::{BatchStore, Store, StorageError};
use crate::model::{MetricKind, MetricSample, MetricValue};

#[derive(Debug, Default)]
struct Inner {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Inner {
    fn apply(&mut self, name: &str, value: MetricValue) {
        match value {
            MetricValue::Gauge(v) => {
                self.gauges.insert(name.to_string(), v);
            }
            MetricValue::Counter(delta) => {
                let total = self.counters.entry(name.to_string()).or_insert(0);
                *total = total.saturating_add(delta);
            }
        }
    }
}

/// Lock-protected in-process store
///
/// Writers take the exclusive side of the lock, readers the shared side. Input
/// is parsed before the lock is taken and everything handed out is a copy.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parses a plain-text literal for `kind`
pub(crate) fn parse_value(kind: &str, raw: &str) -> Result<MetricValue, StorageError> {
    match kind.parse::<MetricKind>()? {
        MetricKind::Gauge => match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(MetricValue::Gauge(value)),
            Ok(_) => Err(StorageError::NonFiniteGauge(raw.to_string())),
            Err(e) => Err(StorageError::InvalidGauge(e)),
        },
        MetricKind::Counter => raw
            .parse::<i64>()
            .map(MetricValue::Counter)
            .map_err(StorageError::InvalidCounter),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn update(&self, kind: &str, name: &str, raw: &str) -> Result<(), StorageError> {
        let value = parse_value(kind, raw)?;
        self.inner.write().await.apply(name, value);
        Ok(())
    }

    async fn get_gauge(&self, name: &str) -> Result<Option<f64>, StorageError> {
        Ok(self.inner.read().await.gauges.get(name).copied())
    }

    async fn get_counter(&self, name: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.inner.read().await.counters.get(name).copied())
    }

    async fn get_all_gauges(&self) -> Result<HashMap<String, f64>, StorageError> {
        Ok(self.inner.read().await.gauges.clone())
    }

    async fn get_all_counters(&self) -> Result<HashMap<String, i64>, StorageError> {
        Ok(self.inner.read().await.counters.clone())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn save_to_file(&self, path: &Path) -> Result<(), StorageError> {
        let mut records: Vec<MetricSample> = {
            let inner = self.inner.read().await;
            inner
                .gauges
                .iter()
                .map(|(name, v)| MetricSample::gauge(name.clone(), *v))
                .chain(
                    inner
                        .counters
                        .iter()
                        .map(|(name, d)| MetricSample::counter(name.clone(), *d)),
                )
                .collect()
        };
        records.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.kind.as_str().cmp(b.kind.as_str())));

        let data = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(path, data).await?;

        debug!(records = records.len(), "Store snapshot saved");
        Ok(())
    }

    /// Replaces stored values with the snapshot content.
    ///
    /// Counter totals are set from the persisted `delta`, not added to the
    /// current total. A missing or empty file leaves the store untouched.
    #[instrument(skip_all, fields(path = %path.display()))]
    async fn load_from_file(&self, path: &Path) -> Result<(), StorageError> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Snapshot file not found, starting empty");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            info!("Snapshot file is empty, starting empty");
            return Ok(());
        }

        let records: Vec<MetricSample> = serde_json::from_slice(&data)?;

        let mut inner = self.inner.write().await;
        let mut loaded = 0usize;
        for record in records {
            match (record.kind, record.value, record.delta) {
                (MetricKind::Gauge, Some(v), _) => {
                    inner.gauges.insert(record.id, v);
                }
                (MetricKind::Counter, _, Some(d)) => {
                    inner.counters.insert(record.id, d);
                }
                _ => {
                    debug!(id = %record.id, "Skipping snapshot record without a value");
                    continue;
                }
            }
            loaded += 1;
        }

        info!(records = loaded, "Store snapshot loaded");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn as_batch(&self) -> Option<&dyn BatchStore> {
        Some(self as &dyn BatchStore)
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn update_batch(&self, samples: &[MetricSample]) -> Result<(), StorageError> {
        let values = samples
            .iter()
            .map(|s| s.payload().map(|v| (s.id.as_str(), v)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut inner = self.inner.write().await;
        for (name, value) in values {
            inner.apply(name, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_gauge_last_write_wins() {
        let store = MemoryStore::new();
        store.update("gauge", "Alloc", "1.5").await.unwrap();
        store.update("gauge", "Alloc", "2.25").await.unwrap();

        assert_eq!(store.get_gauge("Alloc").await.unwrap(), Some(2.25));
        assert_eq!(store.get_gauge("Missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counter_accumulates() {
        let store = MemoryStore::new();
        store.update("counter", "PollCount", "5").await.unwrap();
        store.update("counter", "PollCount", "10").await.unwrap();
        store.update("counter", "PollCount", "-3").await.unwrap();

        assert_eq!(store.get_counter("PollCount").await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn test_concurrent_counter_updates_sum() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.update("counter", "hits", "2").await.unwrap();
                    store
                        .update("gauge", &format!("g{}", worker), "1")
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_counter("hits").await.unwrap(), Some(800));
        assert_eq!(store.get_all_gauges().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let store = MemoryStore::new();

        let err = store.update("gauge", "g", "abc").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidGauge(_)));
        assert!(err.is_validation());

        let err = store.update("counter", "c", "1.5").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidCounter(_)));

        let err = store.update("histogram", "h", "1").await.unwrap_err();
        assert!(err.to_string().contains("unsupported metric type"));

        assert!(store.get_all_gauges().await.unwrap().is_empty());
        assert!(store.get_all_counters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_gauges_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = MemoryStore::new();
        store.update("gauge", "kept", "1.5").await.unwrap();

        for raw in ["NaN", "inf", "-infinity"] {
            let err = store.update("gauge", "g", raw).await.unwrap_err();
            assert!(matches!(err, StorageError::NonFiniteGauge(_)), "{raw}");
            assert!(err.is_validation());
        }

        let batch = vec![MetricSample::gauge("a", 1.0), MetricSample::gauge("b", f64::NAN)];
        let err = store.update_batch(&batch).await.unwrap_err();
        assert!(err.is_validation());

        store.save_to_file(&path).await.unwrap();
        let restored = MemoryStore::new();
        restored.load_from_file(&path).await.unwrap();
        assert_eq!(
            restored.get_all_gauges().await.unwrap(),
            store.get_all_gauges().await.unwrap()
        );
        assert_eq!(store.get_all_gauges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_all_returns_copies() {
        let store = MemoryStore::new();
        store.update("gauge", "g", "1").await.unwrap();

        let mut copy = store.get_all_gauges().await.unwrap();
        copy.insert("g".to_string(), 99.0);
        copy.insert("other".to_string(), 1.0);

        assert_eq!(store.get_gauge("g").await.unwrap(), Some(1.0));
        assert_eq!(store.get_all_gauges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let batch = vec![
            MetricSample::gauge("a", 1.0),
            MetricSample::counter("b", 2),
            MetricSample {
                id: "broken".to_string(),
                kind: MetricKind::Counter,
                delta: None,
                value: Some(3.0),
            },
        ];

        let err = store.update_batch(&batch).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidSample(_)));
        assert!(store.get_all_gauges().await.unwrap().is_empty());
        assert!(store.get_all_counters().await.unwrap().is_empty());

        store.update_batch(&batch[..2]).await.unwrap();
        store.update_batch(&batch[1..2]).await.unwrap();
        assert_eq!(store.get_gauge("a").await.unwrap(), Some(1.0));
        assert_eq!(store.get_counter("b").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = MemoryStore::new();
        store.update("gauge", "Alloc", "123.45").await.unwrap();
        store.update("gauge", "HeapInuse", "0.1").await.unwrap();
        store.update("counter", "PollCount", "7").await.unwrap();
        store.save_to_file(&path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  {"), "snapshot should be pretty-printed");

        let restored = MemoryStore::new();
        restored.load_from_file(&path).await.unwrap();
        assert_eq!(
            restored.get_all_gauges().await.unwrap(),
            store.get_all_gauges().await.unwrap()
        );
        assert_eq!(
            restored.get_all_counters().await.unwrap(),
            store.get_all_counters().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_load_overwrites_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(
            &path,
            r#"[{"id":"PollCount","type":"counter","delta":7},{"id":"g","type":"gauge"}]"#,
        )
        .unwrap();

        let store = MemoryStore::new();
        store.update("counter", "PollCount", "100").await.unwrap();
        store.load_from_file(&path).await.unwrap();

        assert_eq!(store.get_counter("PollCount").await.unwrap(), Some(7));
        assert_eq!(store.get_gauge("g").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_missing_or_empty_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();

        store.load_from_file(&dir.path().join("absent.json")).await.unwrap();

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "  \n").unwrap();
        store.load_from_file(&empty).await.unwrap();

        assert!(store.get_all_gauges().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = MemoryStore::new().load_from_file(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::Json(_)));
    }
}
