//! # Airlock Vault
//!
//! Encrypted, expiring token remapper for the Airlock gateway. Sensitive
//! spans found by the detectors are replaced with opaque placeholders of the
//! form `‹KIND_n›`; the originals live only inside this crate's
//! authenticated-encrypted store and can be restored later under policy.
//!
//! ## Guarantees
//!
//! - **Containment**: plaintext never appears outside the encrypted store;
//!   placeholders are the only cross-component representation.
//! - **Deduplication**: identical (kind, original) pairs within an unexpired
//!   window share one placeholder, via a keyed hash index with atomic
//!   insert-or-get semantics (linearizable under concurrent mints).
//! - **Expiry**: every record carries a TTL (default 24 h); expired and
//!   revoked records are removed by the sweeper.
//! - **Kind binding**: `resolve` fails on a kind mismatch instead of
//!   returning the value.
//!
//! ## Storage
//!
//! Sled, opened durable for production and in-memory for the test harness
//! (see [`TokenVault::temporary`]).

mod crypto;
mod error;
mod record;
mod store;
mod vault;

pub use crypto::VaultCipher;
pub use error::VaultError;
pub use record::{TokenRecord, DEFAULT_TTL_HOURS};
pub use store::VaultStore;
pub use vault::TokenVault;

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
