//! # Airlock Connector
//!
//! Mediated data access for the Airlock gateway: natural-language questions
//! become parameterized queries over declared schemas, execute against
//! allow-listed sources under deadlines and bounded pools, and come back
//! re-scanned and sanitized by the risk agent.
//!
//! ## Components
//!
//! | Component | Responsibility |
//! |-----------|----------------|
//! | [`QueryPlanner`] | question → parameterized plan with risk score |
//! | [`SourceAdapter`] | open / execute / close against one backend |
//! | [`DataConnector`] | gating, pooling, deadlines, result re-scan |
//!
//! ## Security Notes
//!
//! - A plan with any violation, or risk above the gate, never executes.
//! - Deny-listed tables are re-checked at the execution boundary.
//! - Result rows released to the orchestrator are the sanitized form; the
//!   original cells never leave this crate unscanned.

mod adapter;
mod connector;
mod error;
mod planner;
mod rest;
mod source;
mod sql;

pub use adapter::{MemoryAdapter, SourceAdapter, TableData};
pub use connector::{DataConnector, QueryResult};
pub use error::ConnectorError;
pub use planner::{QueryPlan, QueryPlanner, SqlGenerator, Violation};
pub use rest::RestAdapter;
pub use source::{ColumnSchema, DataSourceConfig, SourceKind, SourceRegistry, SourceSchema, TableSchema};
pub use sql::SqlAdapter;

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;
