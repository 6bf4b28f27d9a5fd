//! SQL adapter over sqlx's Any driver.
//!
//! One adapter serves the postgres, mysql and sqlite source kinds; the
//! driver is chosen by the endpoint URL scheme. The pool is the bounded
//! resource here: `max_connections` caps concurrency and `acquire_timeout`
//! is the queue deadline, so pool exhaustion surfaces as `source_busy`
//! rather than unbounded waiting.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::adapter::{SourceAdapter, TableData};
use crate::error::ConnectorError;
use crate::source::DataSourceConfig;
use crate::Result;

/// Adapter for SQL-speaking source kinds.
pub struct SqlAdapter {
    endpoint: String,
    max_rows: usize,
    pool_size: usize,
    queue_deadline: Duration,
    pool: OnceCell<AnyPool>,
}

/// Driver installation must happen exactly once per process.
static INSTALL_DRIVERS: std::sync::Once = std::sync::Once::new();

impl SqlAdapter {
    /// Builds an adapter from a source configuration.
    pub fn new(config: &DataSourceConfig) -> Self {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        Self {
            endpoint: config.endpoint.clone(),
            max_rows: config.max_rows,
            pool_size: config.pool_size,
            queue_deadline: Duration::from_millis(config.queue_deadline_ms),
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&AnyPool> {
        self.pool
            .get_or_try_init(|| async {
                AnyPoolOptions::new()
                    .max_connections(self.pool_size as u32)
                    .acquire_timeout(self.queue_deadline)
                    .connect(&self.endpoint)
                    .await
            })
            .await
            .map_err(ConnectorError::from)
    }

    /// Appends the row cap where the query does not carry one.
    fn with_limit(&self, query: &str) -> String {
        if query.to_lowercase().contains(" limit ") {
            query.to_string()
        } else {
            format!("{} LIMIT {}", query, self.max_rows)
        }
    }

    /// Stringifies one cell; Any rows decode to a small set of types.
    fn cell(row: &AnyRow, index: usize) -> String {
        if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            return v.unwrap_or_default();
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            return v.map(|n| n.to_string()).unwrap_or_default();
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            return v.map(|n| n.to_string()).unwrap_or_default();
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            return v.map(|b| b.to_string()).unwrap_or_default();
        }
        String::new()
    }
}

#[async_trait]
impl SourceAdapter for SqlAdapter {
    async fn open(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    async fn execute(
        &self,
        query: &str,
        parameters: &[String],
        deadline: Duration,
    ) -> Result<TableData> {
        let pool = self.pool().await?;
        let bounded = self.with_limit(query);

        let mut prepared = sqlx::query(&bounded);
        for parameter in parameters {
            prepared = prepared.bind(parameter.as_str());
        }

        let started = Instant::now();
        let rows = match tokio::time::timeout(deadline, prepared.fetch_all(pool)).await {
            Ok(result) => result.map_err(|e| match e {
                sqlx::Error::PoolTimedOut => ConnectorError::SourceBusy,
                other => ConnectorError::from(other),
            })?,
            Err(_) => return Err(ConnectorError::SourceTimeout),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut truncated = false;
        let mut data_rows = Vec::with_capacity(rows.len().min(self.max_rows));
        for (i, row) in rows.iter().enumerate() {
            if i >= self.max_rows {
                truncated = true;
                break;
            }
            data_rows.push((0..columns.len()).map(|c| Self::cell(row, c)).collect());
        }

        debug!(rows = data_rows.len(), elapsed_ms, "sql query executed");
        Ok(TableData {
            columns,
            rows: data_rows,
            elapsed_ms,
            truncated,
        })
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlAdapter")
            .field("max_rows", &self.max_rows)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}
