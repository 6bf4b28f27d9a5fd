//! Error types for vault operations.

use thiserror::Error;

/// Errors surfaced by the token vault.
///
/// `Unavailable` is the degradation signal: the risk agent catches it and
/// falls back to plain `[KIND]` redaction plus an escalate mitigation, so a
/// broken vault never drops a finding.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The backing store cannot be reached or failed mid-operation.
    #[error("Vault unavailable: {0}")]
    Unavailable(#[from] sled::Error),

    /// A record failed to serialize or deserialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resolve was called with a kind that does not match the record.
    #[error("Kind mismatch: record is {expected}, caller asked for {actual}")]
    KindMismatch {
        /// Kind stored on the record.
        expected: String,
        /// Kind the caller named.
        actual: String,
    },

    /// No live record exists for the placeholder.
    #[error("Placeholder not found: {0}")]
    NotFound(String),

    /// Sealing, opening or hashing failed.
    #[error("Crypto error: {0}")]
    Crypto(String),
}
