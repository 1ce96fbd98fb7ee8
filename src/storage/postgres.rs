// PostgreSQL store - upserts keyed by (name, type)
//
// Writes go through the retry executor, so transient database failures
// (connection loss, serialization failures, deadlocks) are retried before the
// request fails.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgExecutor;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::memory::parse_value;
use super::{migrations, BatchStore, Store, StorageError};
use crate::model::{MetricSample, MetricValue};
use crate::retry::{self, DefaultErrorClassifier, RetryError, RetryPolicy};

const UPSERT_GAUGE: &str = r#"
    INSERT INTO metrics (name, type, value, updated_at)
    VALUES ($1, 'gauge', $2, CURRENT_TIMESTAMP)
    ON CONFLICT (name, type)
    DO UPDATE SET value = EXCLUDED.value, updated_at = CURRENT_TIMESTAMP"#;

const UPSERT_COUNTER: &str = r#"
    INSERT INTO metrics (name, type, delta, updated_at)
    VALUES ($1, 'counter', $2, CURRENT_TIMESTAMP)
    ON CONFLICT (name, type)
    DO UPDATE SET delta = metrics.delta + EXCLUDED.delta, updated_at = CURRENT_TIMESTAMP"#;

/// Relational backend
pub struct PostgresStore {
    pool: PgPool,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl PostgresStore {
    /// Connects to `dsn` and brings the schema up to date
    ///
    /// # Returns
    /// * `Ok(PostgresStore)` - Connected and migrated
    /// * `Err(StorageError)` - Database unreachable or migration failed
    pub async fn connect(dsn: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;

        Self::from_pool(pool).await
    }

    /// Uses an existing pool; migrations still run first
    pub async fn from_pool(pool: PgPool) -> Result<Self, StorageError> {
        migrations::run(&pool).await?;
        info!("PostgreSQL store ready");

        Ok(PostgresStore {
            pool,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the retry policy and the token that aborts pending retries
    pub fn with_retry(mut self, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        self.retry = policy;
        self.cancel = cancel;
        self
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn commit_batch(&self, values: &[(&str, MetricValue)]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for (name, value) in values {
            upsert(&mut *tx, name, *value).await?;
        }
        tx.commit().await
    }
}

async fn upsert<'e, E>(executor: E, name: &str, value: MetricValue) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    match value {
        MetricValue::Gauge(v) => {
            sqlx::query(UPSERT_GAUGE)
                .bind(name)
                .bind(v)
                .execute(executor)
                .await?;
        }
        MetricValue::Counter(delta) => {
            sqlx::query(UPSERT_COUNTER)
                .bind(name)
                .bind(delta)
                .execute(executor)
                .await?;
        }
    }
    Ok(())
}

fn retry_failure(err: RetryError<sqlx::Error>) -> StorageError {
    match err {
        RetryError::Permanent(e) => StorageError::Database(e),
        other => StorageError::Unavailable(other),
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self, raw), fields(backend = "postgres"))]
    async fn update(&self, kind: &str, name: &str, raw: &str) -> Result<(), StorageError> {
        let value = parse_value(kind, raw)?;

        retry::execute(&self.cancel, &self.retry, &DefaultErrorClassifier, || {
            upsert(&self.pool, name, value)
        })
        .await
        .map_err(retry_failure)?;

        debug!(?value, "Metric upserted");
        Ok(())
    }

    async fn get_gauge(&self, name: &str) -> Result<Option<f64>, StorageError> {
        let value: Option<Option<f64>> =
            sqlx::query_scalar("SELECT value FROM metrics WHERE name = $1 AND type = 'gauge'")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    async fn get_counter(&self, name: &str) -> Result<Option<i64>, StorageError> {
        let delta: Option<Option<i64>> =
            sqlx::query_scalar("SELECT delta FROM metrics WHERE name = $1 AND type = 'counter'")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(delta.flatten())
    }

    async fn get_all_gauges(&self) -> Result<HashMap<String, f64>, StorageError> {
        let rows: Vec<(String, Option<f64>)> =
            sqlx::query_as("SELECT name, value FROM metrics WHERE type = 'gauge'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect())
    }

    async fn get_all_counters(&self) -> Result<HashMap<String, i64>, StorageError> {
        let rows: Vec<(String, Option<i64>)> =
            sqlx::query_as("SELECT name, delta FROM metrics WHERE type = 'counter'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(name, delta)| delta.map(|d| (name, d)))
            .collect())
    }

    async fn save_to_file(&self, _path: &Path) -> Result<(), StorageError> {
        Err(StorageError::NotSupported {
            op: "save_to_file",
            backend: self.backend(),
        })
    }

    async fn load_from_file(&self, _path: &Path) -> Result<(), StorageError> {
        Err(StorageError::NotSupported {
            op: "load_from_file",
            backend: self.backend(),
        })
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn as_batch(&self) -> Option<&dyn BatchStore> {
        Some(self as &dyn BatchStore)
    }
}

#[async_trait]
impl BatchStore for PostgresStore {
    /// Applies the whole batch inside one transaction
    #[instrument(skip_all, fields(backend = "postgres", samples = samples.len()))]
    async fn update_batch(&self, samples: &[MetricSample]) -> Result<(), StorageError> {
        let values = samples
            .iter()
            .map(|s| s.payload().map(|v| (s.id.as_str(), v)))
            .collect::<Result<Vec<_>, _>>()?;

        retry::execute(&self.cancel, &self.retry, &DefaultErrorClassifier, || {
            self.commit_batch(&values)
        })
        .await
        .map_err(retry_failure)?;

        debug!("Batch committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKind;

    /// Connects to TEST_DATABASE_DSN, or returns None to skip the test
    async fn test_store() -> Option<PostgresStore> {
        let dsn = std::env::var("TEST_DATABASE_DSN").ok()?;
        Some(PostgresStore::connect(&dsn).await.expect("test database must be reachable"))
    }

    fn unique(name: &str) -> String {
        format!("{}_{}", name, std::process::id())
    }

    #[tokio::test]
    async fn test_gauge_overwrite_and_counter_accumulation() {
        let Some(store) = test_store().await else {
            return;
        };
        let gauge = unique("pg_gauge");
        let counter = unique("pg_counter");
        sqlx::query("DELETE FROM metrics WHERE name = $1 OR name = $2")
            .bind(&gauge)
            .bind(&counter)
            .execute(&store.pool)
            .await
            .unwrap();

        store.update("gauge", &gauge, "1.5").await.unwrap();
        store.update("gauge", &gauge, "2.5").await.unwrap();
        store.update("counter", &counter, "5").await.unwrap();
        store.update("counter", &counter, "10").await.unwrap();

        assert_eq!(store.get_gauge(&gauge).await.unwrap(), Some(2.5));
        assert_eq!(store.get_counter(&counter).await.unwrap(), Some(15));
        assert_eq!(store.get_all_gauges().await.unwrap().get(&gauge), Some(&2.5));
        assert_eq!(store.get_all_counters().await.unwrap().get(&counter), Some(&15));
        assert_eq!(store.get_gauge(&unique("pg_absent")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_input_and_unsupported_operations() {
        let Some(store) = test_store().await else {
            return;
        };

        let err = store.update("histogram", "x", "1").await.unwrap_err();
        assert!(err.to_string().contains("unsupported metric type"));
        assert!(store.update("gauge", "x", "abc").await.unwrap_err().is_validation());
        assert!(store.update("counter", "x", "1.5").await.unwrap_err().is_validation());

        let path = Path::new("/tmp/unused.json");
        assert!(store.save_to_file(path).await.unwrap_err().to_string().contains("not supported"));
        assert!(store.load_from_file(path).await.unwrap_err().to_string().contains("not supported"));
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_is_transactional() {
        let Some(store) = test_store().await else {
            return;
        };
        let name = unique("pg_batch");
        sqlx::query("DELETE FROM metrics WHERE name = $1")
            .bind(&name)
            .execute(&store.pool)
            .await
            .unwrap();

        let invalid = vec![
            MetricSample::gauge(name.clone(), 1.0),
            MetricSample {
                id: "broken".to_string(),
                kind: MetricKind::Gauge,
                delta: Some(1),
                value: None,
            },
        ];
        assert!(store.update_batch(&invalid).await.unwrap_err().is_validation());
        assert_eq!(store.get_gauge(&name).await.unwrap(), None);

        store.update_batch(&invalid[..1]).await.unwrap();
        assert_eq!(store.get_gauge(&name).await.unwrap(), Some(1.0));
    }
}
