//! Token record model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default record lifetime when the mint caller supplies none.
///
/// Per-record TTL supplied at mint time is authoritative; 24 hours is only
/// the fallback.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// One vault entry: an encrypted original bound to an opaque placeholder.
///
/// The plaintext never leaves the vault's encrypted store; the placeholder
/// is the only cross-component representation of the redacted value.
///
/// Records are unique by placeholder. The keyed `value_hash` deduplicates:
/// identical (kind, original) pairs within an unexpired window resolve to
/// the same placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque placeholder of the form `‹KIND_n›`.
    pub placeholder: String,
    /// AES-256-GCM ciphertext of the original value.
    pub ciphertext: Vec<u8>,
    /// GCM nonce used for this record.
    pub nonce: Vec<u8>,
    /// Keyed HMAC-SHA256 over (kind, original), for deduplication.
    pub value_hash: Vec<u8>,
    /// Entity kind label, uppercase (e.g. "EMAIL").
    pub kind: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp; the record is dead after this instant.
    pub expires_at: DateTime<Utc>,
    /// Revocation flag; set by `revoke`, cleared only by `sweep` removal.
    pub revoked: bool,
    /// Number of mint-dedupe hits and resolves against this record.
    pub access_count: u64,
    /// Request that first minted the record.
    pub owner_request_id: String,
}

impl TokenRecord {
    /// True if the record has passed its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// True if the record can still be returned by mint or resolve.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// The fallback TTL.
    pub fn default_ttl() -> Duration {
        Duration::hours(DEFAULT_TTL_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: DateTime<Utc>, revoked: bool) -> TokenRecord {
        TokenRecord {
            placeholder: "\u{2039}EMAIL_1\u{203a}".to_string(),
            ciphertext: vec![1, 2, 3],
            nonce: vec![0; 12],
            value_hash: vec![9; 32],
            kind: "EMAIL".to_string(),
            created_at: Utc::now(),
            expires_at,
            revoked,
            access_count: 0,
            owner_request_id: "req-1".to_string(),
        }
    }

    #[test]
    fn test_live_record() {
        let r = record(Utc::now() + Duration::hours(1), false);
        assert!(r.is_live(Utc::now()));
    }

    #[test]
    fn test_expired_record() {
        let r = record(Utc::now() - Duration::seconds(1), false);
        assert!(r.is_expired(Utc::now()));
        assert!(!r.is_live(Utc::now()));
    }

    #[test]
    fn test_revoked_record_not_live() {
        let r = record(Utc::now() + Duration::hours(1), true);
        assert!(!r.is_live(Utc::now()));
    }
}
