//! Postgres relational-store adapter.

use super::BackendAdapter;
use crate::error::KeeperError;
use crate::types::{BackendKind, CleanupOutcome, KeepAliveRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const KIND: BackendKind = BackendKind::RelationalStore;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS keep_alive_reserved (
    id BIGSERIAL PRIMARY KEY,
    ping_timestamp TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP,
    ping_source VARCHAR(255),
    ping_details JSONB DEFAULT '{}'::jsonb
)"#;

const CREATE_INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS keep_alive_reserved_ping_timestamp_idx
    ON keep_alive_reserved (ping_timestamp DESC)"#;

const INSERT_SQL: &str = r#"
INSERT INTO keep_alive_reserved (ping_source, ping_details)
VALUES ($1, $2)
RETURNING id, ping_timestamp"#;

const CLEANUP_SQL: &str = r#"
DELETE FROM keep_alive_reserved
WHERE id NOT IN (
    SELECT id FROM keep_alive_reserved
    ORDER BY ping_timestamp DESC, id DESC
    LIMIT $1
)"#;

/// Postgres adapter
pub struct PostgresAdapter {
    pool: Option<PgPool>,
}

impl PostgresAdapter {
    /// Connect and confirm the server answers `SELECT version()`
    pub async fn connect(
        uri: &str,
        password: Option<&str>,
        limit: Duration,
    ) -> Result<Self, KeeperError> {
        let mut options = PgConnectOptions::from_str(uri)
            .map_err(|e| KeeperError::connection(KIND, format!("failed to parse database uri: {e}")))?
            // Transaction-mode poolers reject named prepared statements.
            .statement_cache_capacity(0)
            .application_name("freeplan-keeper");

        if let Some(password) = password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(limit)
            .connect_with(options)
            .await
            .map_err(|e| KeeperError::connection(KIND, format!("failed to connect to database: {e}")))?;

        let version: String = match sqlx::query_scalar("SELECT version()").fetch_one(&pool).await {
            Ok(version) => version,
            Err(e) => {
                pool.close().await;
                return Err(KeeperError::connection(KIND, format!("failed to query database: {e}")));
            }
        };

        debug!(version = %version, "Postgres session established");

        Ok(Self { pool: Some(pool) })
    }

    fn pool(&self) -> Result<&PgPool, KeeperError> {
        self.pool
            .as_ref()
            .ok_or_else(|| KeeperError::sustain(KIND, "pool already released"))
    }

    async fn ensure_schema(pool: &PgPool) -> Result<(), KeeperError> {
        sqlx::query(CREATE_TABLE_SQL)
            .execute(pool)
            .await
            .map_err(|e| KeeperError::sustain(KIND, format!("failed to create keep_alive_reserved table: {e}")))?;

        sqlx::query(CREATE_INDEX_SQL)
            .execute(pool)
            .await
            .map_err(|e| KeeperError::sustain(KIND, format!("failed to create timestamp index: {e}")))?;

        Ok(())
    }

    async fn prune(pool: &PgPool, limit: u32) -> Result<u64, KeeperError> {
        let result = sqlx::query(CLEANUP_SQL)
            .bind(i64::from(limit))
            .execute(pool)
            .await
            .map_err(|e| KeeperError::cleanup(KIND, format!("failed to cleanup old records: {e}")))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BackendAdapter for PostgresAdapter {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn sustain(&mut self, hostname: &str) -> Result<KeepAliveRecord, KeeperError> {
        let pool = self.pool()?;
        Self::ensure_schema(pool).await?;

        let mut record = KeepAliveRecord::new(KIND, hostname);

        let (id, written_at): (i64, DateTime<Utc>) = sqlx::query_as(INSERT_SQL)
            .bind(&record.ping_source)
            .bind(Json(&record.ping_details))
            .fetch_one(pool)
            .await
            .map_err(|e| KeeperError::sustain(KIND, format!("failed to insert keep-alive record: {e}")))?;

        // The server clock decides retention order.
        record.ping_timestamp = written_at;
        Ok(record.with_id(id.to_string()))
    }

    async fn cleanup(&mut self, retention_limit: u32) -> Result<CleanupOutcome, KeeperError> {
        let pool = self
            .pool()
            .map_err(|_| KeeperError::cleanup(KIND, "pool already released"))?;
        Self::prune(pool, retention_limit)
            .await
            .map(CleanupOutcome::Pruned)
    }

    async fn release(&mut self) -> Result<(), KeeperError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            debug!("Postgres pool closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_newest_with_id_tie_break() {
        let normalized: String = CLEANUP_SQL.split_whitespace().collect::<Vec<_>>().join(" ");
        assert!(normalized.contains("WHERE id NOT IN ( SELECT id FROM keep_alive_reserved"));
        assert!(normalized.contains("ORDER BY ping_timestamp DESC, id DESC LIMIT $1"));
    }

    #[test]
    fn test_schema_statements_are_idempotent() {
        assert!(CREATE_TABLE_SQL.contains("CREATE TABLE IF NOT EXISTS keep_alive_reserved"));
        assert!(CREATE_INDEX_SQL.contains("CREATE INDEX IF NOT EXISTS"));
        assert!(CREATE_INDEX_SQL.contains("(ping_timestamp DESC)"));
    }
}
