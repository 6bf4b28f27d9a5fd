//! Error types for the gateway core.

use thiserror::Error;

/// Infrastructure errors at the gateway boundary.
///
/// Per the propagation policy, component-internal trouble becomes findings
/// or typed result fields; only infrastructure failures (vault, audit sink)
/// and configuration problems surface here.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Audit or vault storage failure.
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Report serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Vault failure at initialization.
    #[error("Vault error: {0}")]
    Vault(#[from] airlock_vault::VaultError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
