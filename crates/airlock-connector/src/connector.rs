//! # Secure Data Connector
//!
//! Holds the registered sources and their adapters, gates execution on the
//! plan's verdict and the deny list, enforces pool and query deadlines, and
//! re-scans results through the risk agent before anything re-enters the
//! transcript.
//!
//! ## Execution Pipeline
//!
//! ```text
//! plan ──▶ gate check ──▶ pool slot ──▶ execute ──▶ project ──▶ re-scan
//!            │                │            │                      │
//!            ▼                ▼            ▼                      ▼
//!        refused          source_busy  source_timeout      block ⇒ empty rows
//!                                                          sanitize ⇒ rewrite
//! ```
//!
//! ## Security Notes
//!
//! - The deny list is re-checked here, immediately before execution; the
//!   planner's verdict is not trusted across the call boundary.
//! - Released rows are the sanitized form. A blocked result keeps its
//!   assessment but carries zero rows and `is_safe = false`.
//! - Failures never escape as errors; they become explained, empty results
//!   the orchestrator can hand back to the model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use airlock_agent::{AnalyzeRequest, Phase, ProcessingMode, RiskAgent, RiskAssessment};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::adapter::{SourceAdapter, TableData};
use crate::error::ConnectorError;
use crate::planner::{referenced_tables, QueryPlan};
use crate::rest::RestAdapter;
use crate::source::{DataSourceConfig, SourceRegistry};
use crate::sql::SqlAdapter;

/// Result of one gated query execution.
///
/// The rows are the releasable (sanitized) form; `is_safe = false` means the
/// result was refused, failed, or blocked by the re-scan, and explains
/// itself through `failure` and `result_assessment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names.
    pub columns: Vec<String>,
    /// Sanitized rows.
    pub rows: Vec<Vec<String>>,
    /// Row count after truncation and blocking.
    pub row_count: usize,
    /// Execution wall-clock, zero when nothing executed.
    pub elapsed_ms: u64,
    /// The re-scan assessment, when the scan ran.
    pub result_assessment: Option<RiskAssessment>,
    /// True only for an executed, released result.
    pub is_safe: bool,
    /// True if the row set was cut at the configured cap.
    pub truncated: bool,
    /// Machine-readable failure tag plus detail, for the tool trace.
    pub failure: Option<String>,
}

impl QueryResult {
    fn refused(reason: String) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            elapsed_ms: 0,
            result_assessment: None,
            is_safe: false,
            truncated: false,
            failure: Some(reason),
        }
    }

    /// Rows as key/value grounding records, for hallucination verification.
    pub fn grounding_records(&self) -> Vec<airlock_detectors::GroundingRecord> {
        let mut records = Vec::new();
        for row in &self.rows {
            for (column, cell) in self.columns.iter().zip(row.iter()) {
                records.push(airlock_detectors::GroundingRecord::new(
                    column.clone(),
                    cell.clone(),
                ));
            }
        }
        records
    }
}

/// The secure data connector.
///
/// Shared across requests; adapters and per-source pool semaphores are
/// created on first use and cached.
pub struct DataConnector {
    registry: RwLock<SourceRegistry>,
    adapters: Mutex<HashMap<String, Arc<dyn SourceAdapter>>>,
    pools: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl DataConnector {
    /// Builds a connector over the registered sources.
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            registry: RwLock::new(registry),
            adapters: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Administration: inserts or replaces a source configuration.
    ///
    /// A replaced source drops its cached adapter and pool so the next query
    /// sees the new endpoint and limits.
    pub fn upsert_source(&self, config: DataSourceConfig) {
        let name = config.name.clone();
        self.registry
            .write()
            .expect("source registry lock poisoned")
            .upsert(config);
        self.adapters
            .lock()
            .expect("adapter registry lock poisoned")
            .remove(&name);
        self.pools
            .lock()
            .expect("pool registry lock poisoned")
            .remove(&name);
    }

    /// Administration: all registered sources, in name order. Records carry
    /// credential handles only, never credential material.
    pub fn list_sources(&self) -> Vec<Arc<DataSourceConfig>> {
        self.registry
            .read()
            .expect("source registry lock poisoned")
            .list()
    }

    /// Looks a source up by name.
    pub fn get_source(&self, name: &str) -> Option<Arc<DataSourceConfig>> {
        self.registry
            .read()
            .expect("source registry lock poisoned")
            .get(name)
    }

    /// Installs a specific adapter for a source, replacing the built-in
    /// choice. The test harness uses this to wire in scripted adapters.
    pub fn install_adapter(&self, source: &str, adapter: Arc<dyn SourceAdapter>) {
        self.adapters
            .lock()
            .expect("adapter registry lock poisoned")
            .insert(source.to_string(), adapter);
    }

    /// Runs one plan against its target source.
    ///
    /// Never returns an error: every failure mode becomes an explained
    /// `QueryResult` per the gateway's propagation policy.
    pub async fn run(
        &self,
        plan: &QueryPlan,
        agent: &RiskAgent,
        mode: ProcessingMode,
        request_id: &str,
    ) -> QueryResult {
        if !plan.is_executable() {
            warn!(source = %plan.target_source, "refusing unexecutable plan");
            return QueryResult::refused(format!("query_plan_violation: {}", plan.summary()));
        }

        let config = match self.get_source(&plan.target_source) {
            Some(config) => config,
            None => {
                return QueryResult::refused(format!(
                    "query_plan_violation: unknown source '{}'",
                    plan.target_source
                ))
            }
        };

        // Deny list re-check at the execution boundary.
        for table in referenced_tables(&plan.generated_query) {
            if config.is_denied(&table) {
                warn!(table = %table, "deny-listed table at execution boundary");
                return QueryResult::refused(format!(
                    "query_plan_violation: table '{}' is deny-listed",
                    table
                ));
            }
        }

        // Bounded, fair pool with a queue deadline.
        let semaphore = self.pool_for(&config);
        let queue_deadline = Duration::from_millis(config.queue_deadline_ms);
        let permit =
            match tokio::time::timeout(queue_deadline, semaphore.acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                _ => {
                    warn!(source = %config.name, "pool exhausted");
                    return QueryResult::refused("source_busy".to_string());
                }
            };

        let adapter = self.adapter_for(&config);
        let deadline = Duration::from_millis(config.max_query_ms);
        let executed = adapter
            .execute(&plan.generated_query, &plan.parameters, deadline)
            .await;
        drop(permit);

        let data = match executed {
            Ok(data) => data,
            Err(err) => {
                warn!(source = %config.name, error = %err, "query execution failed");
                return QueryResult::refused(format!("{}: {}", err.tag(), err));
            }
        };

        self.release(data, &config, agent, mode, request_id).await
    }

    /// Truncates, re-scans and sanitizes an executed result.
    async fn release(
        &self,
        mut data: TableData,
        config: &DataSourceConfig,
        agent: &RiskAgent,
        mode: ProcessingMode,
        request_id: &str,
    ) -> QueryResult {
        if data.rows.len() > config.max_rows {
            data.rows.truncate(config.max_rows);
            data.truncated = true;
        }

        let mut assessment = None;
        let mut rows = data.rows;
        let mut is_safe = true;

        if config.risk_scan_results && !rows.is_empty() {
            let projection = project(&data.columns, &rows);
            let request = AnalyzeRequest::new(mode, request_id);
            let scanned = agent.analyze(&projection, Phase::Data, &request).await;

            if scanned.is_blocked() {
                warn!(source = %config.name, "result blocked by re-scan, emptying rows");
                rows = Vec::new();
                is_safe = false;
            } else if config.sanitize_results && scanned.is_sanitized() {
                if let Some(sanitized) = scanned.sanitized_text.as_deref() {
                    rows = unproject(&data.columns, sanitized, &rows);
                }
            }
            assessment = Some(scanned);
        }

        debug!(
            source = %config.name,
            rows = rows.len(),
            safe = is_safe,
            "query result released"
        );
        QueryResult {
            columns: data.columns,
            row_count: rows.len(),
            rows,
            elapsed_ms: data.elapsed_ms,
            result_assessment: assessment,
            is_safe,
            truncated: data.truncated,
            failure: None,
        }
    }

    /// The cached adapter for a source, built on first use.
    fn adapter_for(&self, config: &DataSourceConfig) -> Arc<dyn SourceAdapter> {
        let mut adapters = self.adapters.lock().expect("adapter registry lock poisoned");
        adapters
            .entry(config.name.clone())
            .or_insert_with(|| {
                if config.kind.is_sql() {
                    Arc::new(SqlAdapter::new(config))
                } else {
                    Arc::new(RestAdapter::new(config))
                }
            })
            .clone()
    }

    /// The cached pool semaphore for a source.
    fn pool_for(&self, config: &DataSourceConfig) -> Arc<Semaphore> {
        let mut pools = self.pools.lock().expect("pool registry lock poisoned");
        pools
            .entry(config.name.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(config.pool_size.max(1))))
            .clone()
    }
}

impl std::fmt::Debug for DataConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataConnector")
            .field("sources", &self.list_sources().len())
            .finish_non_exhaustive()
    }
}

/// Builds the textual projection the risk agent scans: `column: value`
/// lines, one row per blank-line-delimited block. Newlines inside cells are
/// folded so cell boundaries stay unambiguous.
fn project(columns: &[String], rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .zip(row.iter())
                .map(|(column, cell)| format!("{}: {}", column, cell.replace('\n', " ")))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Maps a sanitized projection back onto cells. The projection preserves
/// cell boundaries, so each line maps to exactly one cell; anything
/// unexpected falls back to the original cell.
fn unproject(columns: &[String], sanitized: &str, original: &[Vec<String>]) -> Vec<Vec<String>> {
    let blocks: Vec<&str> = sanitized.split("\n\n").collect();
    original
        .iter()
        .enumerate()
        .map(|(r, row)| {
            let lines: Vec<&str> = blocks
                .get(r)
                .map(|block| block.lines().collect())
                .unwrap_or_default();
            row.iter()
                .enumerate()
                .map(|(c, cell)| {
                    lines
                        .get(c)
                        .and_then(|line| {
                            let prefix_len = columns.get(c).map(|n| n.len() + 2)?;
                            if line.len() >= prefix_len {
                                Some(line[prefix_len..].to_string())
                            } else {
                                None
                            }
                        })
                        .unwrap_or_else(|| cell.clone())
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_shape() {
        let columns = vec!["id".to_string(), "status".to_string()];
        let rows = vec![
            vec!["ORD-1".to_string(), "in_transit".to_string()],
            vec!["ORD-2".to_string(), "a\nb".to_string()],
        ];
        let projection = project(&columns, &rows);
        assert_eq!(
            projection,
            "id: ORD-1\nstatus: in_transit\n\nid: ORD-2\nstatus: a b"
        );
    }

    #[test]
    fn test_unproject_roundtrip() {
        let columns = vec!["id".to_string(), "email".to_string()];
        let rows = vec![vec!["1".to_string(), "a@b.io".to_string()]];
        let projection = project(&columns, &rows);
        let restored = unproject(&columns, &projection, &rows);
        assert_eq!(restored, rows);
    }

    #[test]
    fn test_unproject_applies_replacement() {
        let columns = vec!["id".to_string(), "email".to_string()];
        let rows = vec![vec!["1".to_string(), "a@b.io".to_string()]];
        let sanitized = "id: 1\nemail: \u{2039}EMAIL_1\u{203a}";
        let restored = unproject(&columns, sanitized, &rows);
        assert_eq!(restored[0][1], "\u{2039}EMAIL_1\u{203a}");
    }
}
