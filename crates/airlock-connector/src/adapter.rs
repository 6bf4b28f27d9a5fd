//! Source adapter trait and the in-memory test adapter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::Result;

/// Columnar data returned by an adapter, plus timing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    /// Column names, in projection order.
    pub columns: Vec<String>,
    /// Rows of stringified cells, one per column.
    pub rows: Vec<Vec<String>>,
    /// Wall-clock execution time.
    pub elapsed_ms: u64,
    /// True if the adapter cut the row set at the configured cap.
    pub truncated: bool,
}

/// One data-source backend.
///
/// Adapters are scoped resources: `open` before first use, `close` on
/// shutdown. `execute` must honor its deadline by cooperative cancellation
/// and must not write to shared state after cancellation is observed.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Establishes connectivity (pools, clients).
    async fn open(&self) -> Result<()>;

    /// Runs one parameterized query under a deadline.
    async fn execute(
        &self,
        query: &str,
        parameters: &[String],
        deadline: Duration,
    ) -> Result<TableData>;

    /// Releases held resources.
    async fn close(&self) -> Result<()>;
}

/// Scriptable in-memory adapter for the test harness.
///
/// Doubles as a spy: it counts executions and records the last query, which
/// the pipeline tests use to prove that blocked inputs never reach a source.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Artificial latency, for deadline and pool-exhaustion tests.
    delay: Option<Duration>,
    /// When set, execute fails with this error kind.
    fail_busy: bool,
    execute_count: AtomicUsize,
    last_query: Mutex<Option<(String, Vec<String>)>>,
}

impl MemoryAdapter {
    /// An adapter that returns the given table.
    pub fn new(columns: Vec<&str>, rows: Vec<Vec<&str>>) -> Self {
        Self {
            columns: columns.into_iter().map(String::from).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(String::from).collect())
                .collect(),
            ..Default::default()
        }
    }

    /// Adds artificial latency to every execute.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every execute fail with `SourceUnavailable`.
    pub fn failing(mut self) -> Self {
        self.fail_busy = true;
        self
    }

    /// Number of executions performed.
    pub fn execute_count(&self) -> usize {
        self.execute_count.load(Ordering::SeqCst)
    }

    /// The most recent query and parameters, if any.
    pub fn last_query(&self) -> Option<(String, Vec<String>)> {
        self.last_query.lock().expect("spy lock poisoned").clone()
    }
}

#[async_trait]
impl SourceAdapter for MemoryAdapter {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(
        &self,
        query: &str,
        parameters: &[String],
        deadline: Duration,
    ) -> Result<TableData> {
        self.execute_count.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().expect("spy lock poisoned") =
            Some((query.to_string(), parameters.to_vec()));

        if self.fail_busy {
            return Err(ConnectorError::SourceUnavailable(
                "memory adapter scripted failure".to_string(),
            ));
        }
        if let Some(delay) = self.delay {
            if delay >= deadline {
                tokio::time::sleep(deadline).await;
                return Err(ConnectorError::SourceTimeout);
            }
            tokio::time::sleep(delay).await;
        }

        Ok(TableData {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
            elapsed_ms: self.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
            truncated: false,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
