//! Database migrations.

use sqlx::PgPool;
use tracing::{info, instrument};

use super::StorageError;

const SCHEMA_VERSION: i64 = 2;

fn failed(e: sqlx::Error) -> StorageError {
    StorageError::Migration(e.to_string())
}

#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version BIGINT PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(failed)?;

    let current_version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await
            .map_err(failed)?;

    let current_version = current_version.unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    if current_version < 2 {
        migrate_to_v2(pool).await?;
    }

    Ok(())
}

#[instrument(skip(pool))]
async fn migrate_to_v1(pool: &PgPool) -> Result<(), StorageError> {
    info!("Running migration to schema version 1");

    let mut tx = pool.begin().await.map_err(failed)?;

    // One row per (name, type); gauges use `value`, counters use `delta`
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metrics (
            name TEXT NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('gauge', 'counter')),
            value DOUBLE PRECISION,
            delta BIGINT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (name, type)
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(failed)?;

    sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
        .bind(1_i64)
        .execute(&mut *tx)
        .await
        .map_err(failed)?;

    tx.commit().await.map_err(failed)?;
    Ok(())
}

#[instrument(skip(pool))]
async fn migrate_to_v2(pool: &PgPool) -> Result<(), StorageError> {
    info!("Running migration to schema version 2");

    let mut tx = pool.begin().await.map_err(failed)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_metrics_type ON metrics(type)")
        .execute(&mut *tx)
        .await
        .map_err(failed)?;

    sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
        .bind(2_i64)
        .execute(&mut *tx)
        .await
        .map_err(failed)?;

    tx.commit().await.map_err(failed)?;
    Ok(())
}
