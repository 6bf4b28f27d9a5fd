//! Data-source configuration, declared schemas and the source registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Kind of backing store a source speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// PostgreSQL over the SQL adapter.
    Postgres,
    /// MySQL over the SQL adapter.
    Mysql,
    /// Supabase REST endpoint.
    Supabase,
    /// Plain REST endpoint.
    Rest,
    /// SQLite over the SQL adapter.
    Sqlite,
}

impl SourceKind {
    /// True for kinds served by the SQL adapter.
    pub fn is_sql(&self) -> bool {
        matches!(self, SourceKind::Postgres | SourceKind::Mysql | SourceKind::Sqlite)
    }
}

/// A column in a declared table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Marked sensitive by the administrator; wildcard selection over a
    /// table containing sensitive columns raises plan risk.
    #[serde(default)]
    pub sensitive: bool,
}

impl ColumnSchema {
    /// A plain column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sensitive: false,
        }
    }

    /// A sensitive column.
    pub fn sensitive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sensitive: true,
        }
    }
}

/// A table in a declared source schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Declared columns.
    pub columns: Vec<ColumnSchema>,
    /// Approximate row count; tables above the large-table threshold need a
    /// WHERE clause to avoid a risk surcharge.
    #[serde(default)]
    pub row_estimate: u64,
}

impl TableSchema {
    /// True if any column is marked sensitive.
    pub fn has_sensitive_columns(&self) -> bool {
        self.columns.iter().any(|c| c.sensitive)
    }

    /// Looks a column up by name, case-insensitive.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// The declared schema of one data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSchema {
    /// Declared tables.
    pub tables: Vec<TableSchema>,
}

impl SourceSchema {
    /// Looks a table up by name, case-insensitive.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// Administrative record for one data source.
///
/// Credentials are referenced by handle only; the record never embeds
/// secret material and can be listed back to administrators verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Unique source name, referenced by tool calls.
    pub name: String,
    /// Backing store kind.
    pub kind: SourceKind,
    /// Connection URL or base endpoint.
    pub endpoint: String,
    /// Handle into the external credential store.
    pub credentials_ref: String,
    /// Tables queries may touch. Empty means nothing is allowed.
    pub allow_tables: Vec<String>,
    /// Tables queries must never touch; wins over the allow list.
    pub deny_tables: Vec<String>,
    /// Row cap enforced by the adapter (LIMIT or post-fetch truncation).
    pub max_rows: usize,
    /// Per-query execution deadline in milliseconds.
    pub max_query_ms: u64,
    /// Rewrite result cells with the agent's sanitized projection.
    pub sanitize_results: bool,
    /// Re-scan results through the risk agent before release.
    pub risk_scan_results: bool,
    /// Bounded connection/concurrency pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// How long to queue for a pool slot before failing `source_busy`.
    #[serde(default = "default_queue_deadline_ms")]
    pub queue_deadline_ms: u64,
    /// Declared schema the planner works against.
    #[serde(default)]
    pub schema: SourceSchema,
}

fn default_pool_size() -> usize {
    4
}

fn default_queue_deadline_ms() -> u64 {
    1_000
}

impl DataSourceConfig {
    /// True if the table is on the deny list.
    pub fn is_denied(&self, table: &str) -> bool {
        self.deny_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
    }

    /// True if the table is allowed (on the allow list and not denied).
    pub fn is_allowed(&self, table: &str) -> bool {
        !self.is_denied(table)
            && self
                .allow_tables
                .iter()
                .any(|t| t.eq_ignore_ascii_case(table))
    }
}

/// Process-wide registry of data-source configurations.
///
/// Upserts happen through administration before traffic starts; reads during
/// requests are lock-free clones of `Arc`ed records.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<DataSourceConfig>>,
}

impl SourceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a source configuration.
    pub fn upsert(&mut self, config: DataSourceConfig) {
        self.sources.insert(config.name.clone(), Arc::new(config));
    }

    /// Looks a source up by name.
    pub fn get(&self, name: &str) -> Option<Arc<DataSourceConfig>> {
        self.sources.get(name).cloned()
    }

    /// All registered sources, in name order.
    pub fn list(&self) -> Vec<Arc<DataSourceConfig>> {
        self.sources.values().cloned().collect()
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no source is registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A representative orders source used across the crate's tests.
    pub(crate) fn orders_source() -> DataSourceConfig {
        DataSourceConfig {
            name: "orders".to_string(),
            kind: SourceKind::Sqlite,
            endpoint: "sqlite::memory:".to_string(),
            credentials_ref: "cred-orders".to_string(),
            allow_tables: vec!["orders".to_string(), "shipments".to_string()],
            deny_tables: vec!["users".to_string()],
            max_rows: 50,
            max_query_ms: 500,
            sanitize_results: true,
            risk_scan_results: true,
            pool_size: 2,
            queue_deadline_ms: 100,
            schema: SourceSchema {
                tables: vec![
                    TableSchema {
                        name: "orders".to_string(),
                        columns: vec![
                            ColumnSchema::new("id"),
                            ColumnSchema::new("status"),
                            ColumnSchema::new("eta"),
                            ColumnSchema::sensitive("email"),
                        ],
                        row_estimate: 100_000,
                    },
                    TableSchema {
                        name: "shipments".to_string(),
                        columns: vec![ColumnSchema::new("id"), ColumnSchema::new("carrier")],
                        row_estimate: 500,
                    },
                ],
            },
        }
    }

    #[test]
    fn test_allow_and_deny() {
        let config = orders_source();
        assert!(config.is_allowed("orders"));
        assert!(config.is_allowed("ORDERS"));
        assert!(!config.is_allowed("users"));
        assert!(config.is_denied("users"));
        assert!(!config.is_allowed("invoices"));
    }

    #[test]
    fn test_registry_upsert_and_list() {
        let mut registry = SourceRegistry::new();
        registry.upsert(orders_source());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("orders").is_some());

        let mut updated = orders_source();
        updated.max_rows = 10;
        registry.upsert(updated);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("orders").unwrap().max_rows, 10);
    }

    #[test]
    fn test_schema_lookup() {
        let config = orders_source();
        let table = config.schema.table("orders").unwrap();
        assert!(table.has_sensitive_columns());
        assert!(table.column("EMAIL").unwrap().sensitive);
        assert!(!config.schema.table("shipments").unwrap().has_sensitive_columns());
    }

    #[test]
    fn test_config_serialization_defaults() {
        let json = r#"{
            "name": "s", "kind": "rest", "endpoint": "https://api.example.com",
            "credentials_ref": "h", "allow_tables": ["a"], "deny_tables": [],
            "max_rows": 10, "max_query_ms": 100,
            "sanitize_results": true, "risk_scan_results": true
        }"#;
        let config: DataSourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.queue_deadline_ms, 1_000);
        assert!(config.schema.tables.is_empty());
    }
}
