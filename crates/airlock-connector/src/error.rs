//! Error types for connector operations.

use thiserror::Error;

/// Errors surfaced by planning and execution.
///
/// These stay inside the connector boundary: `run` converts every one of
/// them into `QueryResult` fields so the orchestrator only ever matches on
/// typed results, never on stringly failures.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// No pool slot became free within the queue deadline.
    #[error("Source busy")]
    SourceBusy,

    /// The query missed its execution deadline.
    #[error("Source timeout")]
    SourceTimeout,

    /// The source cannot be reached or answered with an error.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Adapter-level protocol problem.
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// SQL driver passthrough.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// HTTP client passthrough.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ConnectorError {
    /// Short machine-readable tag for tool traces.
    pub fn tag(&self) -> &'static str {
        match self {
            ConnectorError::SourceBusy => "source_busy",
            ConnectorError::SourceTimeout => "source_timeout",
            ConnectorError::SourceUnavailable(_) => "source_unavailable",
            ConnectorError::Adapter(_) => "source_unavailable",
            ConnectorError::Sql(_) => "source_unavailable",
            ConnectorError::Http(_) => "source_unavailable",
        }
    }
}
