//! # Token Vault
//!
//! The token remapper: replaces sensitive spans with opaque placeholders and
//! restores them later under policy.
//!
//! ## Security Model
//!
//! - `mint` deduplicates by a keyed hash of (kind, original): identical
//!   values within an unexpired window share one placeholder, so a
//!   transcript never reveals whether two redacted values differ by
//!   accident of numbering.
//! - The original is sealed with AES-256-GCM before it touches the store;
//!   invariant: plaintext never appears outside the encrypted store.
//! - `resolve` demands the caller name the kind it expects. A mismatch is a
//!   `KindMismatch` error, not a value - callers cannot fish for originals
//!   by iterating kinds.
//! - `sweep` removes expired and revoked records; it runs opportunistically
//!   on each mint and from a timer in the gateway.

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::crypto::VaultCipher;
use crate::error::VaultError;
use crate::record::TokenRecord;
use crate::store::VaultStore;
use crate::Result;

/// The token remapper.
///
/// # Example
///
/// ```rust
/// use airlock_vault::TokenVault;
///
/// let vault = TokenVault::temporary(b"process-secret").unwrap();
/// let placeholder = vault.mint("alice@example.com", "EMAIL", None, "req-1").unwrap();
/// assert_eq!(placeholder, "\u{2039}EMAIL_1\u{203a}");
/// assert_eq!(vault.resolve(&placeholder, "EMAIL").unwrap(), "alice@example.com");
/// ```
#[derive(Clone, Debug)]
pub struct TokenVault {
    store: VaultStore,
    cipher: VaultCipher,
}

impl TokenVault {
    /// Opens a vault backed by an on-disk store.
    pub fn open(path: impl AsRef<std::path::Path>, secret: &[u8]) -> Result<Self> {
        Ok(Self {
            store: VaultStore::open(path)?,
            cipher: VaultCipher::from_secret(secret),
        })
    }

    /// Creates an in-memory vault for the test harness.
    pub fn temporary(secret: &[u8]) -> Result<Self> {
        Ok(Self {
            store: VaultStore::temporary()?,
            cipher: VaultCipher::from_secret(secret),
        })
    }

    /// Mints a placeholder for (kind, original).
    ///
    /// Returns the existing placeholder if an unexpired, non-revoked record
    /// with the same keyed hash exists; otherwise seals the original and
    /// stores a new record. Concurrent mints of the same pair are
    /// linearized on the hash index and return the same placeholder.
    ///
    /// # Arguments
    ///
    /// * `original` - the sensitive value to redact
    /// * `kind` - entity kind label; uppercased into the placeholder
    /// * `ttl` - record lifetime; defaults to 24 h when `None`
    /// * `owner_request_id` - request that triggered the mint
    ///
    /// # Errors
    ///
    /// `VaultError::Unavailable` if the store cannot be reached; the caller
    /// must then choose between blocking and the `[KIND]` redaction
    /// fallback - the finding itself is never dropped.
    pub fn mint(
        &self,
        original: &str,
        kind: &str,
        ttl: Option<Duration>,
        owner_request_id: &str,
    ) -> Result<String> {
        let kind = kind.to_uppercase();
        let hash = self.cipher.value_hash(&kind, original);
        let now = Utc::now();

        // Opportunistic sweep keeps the hash index honest without a
        // dedicated maintenance window.
        self.sweep()?;

        loop {
            if let Some(existing) = self.store.get_by_hash(&hash)? {
                match self.store.get_record(&existing)? {
                    Some(mut record) if record.is_live(now) => {
                        record.access_count += 1;
                        self.store.put_record(&record)?;
                        debug!(placeholder = %record.placeholder, "mint deduplicated");
                        return Ok(record.placeholder);
                    }
                    Some(record) => {
                        // Stale winner: clear record and index, retry the claim.
                        self.store.remove_record(&record)?;
                        self.store
                            .release_hash_owned(&record.value_hash, &record.placeholder)?;
                    }
                    None => {
                        // Dangling index entry.
                        self.store.release_hash(&hash)?;
                    }
                }
                continue;
            }

            let n = self.store.next_sequence(&kind)?;
            let placeholder = format!("\u{2039}{}_{}\u{203a}", kind, n);
            let (nonce, ciphertext) = self.cipher.seal(original.as_bytes())?;
            let record = TokenRecord {
                placeholder: placeholder.clone(),
                ciphertext,
                nonce,
                value_hash: hash.clone(),
                kind: kind.clone(),
                created_at: now,
                expires_at: now + ttl.unwrap_or_else(TokenRecord::default_ttl),
                revoked: false,
                access_count: 0,
                owner_request_id: owner_request_id.to_string(),
            };
            self.store.put_record(&record)?;

            if self.store.claim_hash(&hash, &placeholder)? {
                debug!(placeholder = %placeholder, kind = %kind, "minted placeholder");
                return Ok(placeholder);
            }
            // Lost the race: drop our record and adopt the winner's.
            self.store.remove_record(&record)?;
        }
    }

    /// Resolves a placeholder back to its original value.
    ///
    /// The caller must name the kind it expects; a mismatch fails with
    /// `KindMismatch`. Expired or revoked placeholders resolve to nothing.
    pub fn resolve(&self, placeholder: &str, kind: &str) -> Result<String> {
        let kind = kind.to_uppercase();
        let mut record = self
            .store
            .get_record(placeholder)?
            .ok_or_else(|| VaultError::NotFound(placeholder.to_string()))?;

        if record.kind != kind {
            warn!(placeholder = %placeholder, "resolve with mismatched kind");
            return Err(VaultError::KindMismatch {
                expected: record.kind,
                actual: kind,
            });
        }
        if !record.is_live(Utc::now()) {
            return Err(VaultError::NotFound(placeholder.to_string()));
        }

        let plaintext = self.cipher.open(&record.nonce, &record.ciphertext)?;
        record.access_count += 1;
        self.store.put_record(&record)?;

        String::from_utf8(plaintext)
            .map_err(|_| VaultError::Crypto("plaintext is not UTF-8".to_string()))
    }

    /// Marks a placeholder revoked. The record stays until swept.
    pub fn revoke(&self, placeholder: &str) -> Result<()> {
        let mut record = self
            .store
            .get_record(placeholder)?
            .ok_or_else(|| VaultError::NotFound(placeholder.to_string()))?;
        record.revoked = true;
        self.store.put_record(&record)?;
        debug!(placeholder = %placeholder, "placeholder revoked");
        Ok(())
    }

    /// Removes expired and revoked records. Returns the number removed.
    pub fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for record in self.store.records()? {
            if !record.is_live(now) {
                self.store.remove_record(&record)?;
                self.store
                    .release_hash_owned(&record.value_hash, &record.placeholder)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "vault sweep complete");
        }
        Ok(removed)
    }

    /// Number of stored records (live and not-yet-swept).
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if the vault holds no records.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Flushes the backing store.
    pub fn flush(&self) -> Result<usize> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> TokenVault {
        TokenVault::temporary(b"test-secret").unwrap()
    }

    #[test]
    fn test_mint_resolve_roundtrip() {
        let v = vault();
        let p = v.mint("alice@example.com", "EMAIL", None, "req-1").unwrap();
        assert_eq!(p, "\u{2039}EMAIL_1\u{203a}");
        assert_eq!(v.resolve(&p, "EMAIL").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_mint_deduplicates() {
        let v = vault();
        let p1 = v.mint("alice@example.com", "EMAIL", None, "req-1").unwrap();
        let p2 = v.mint("alice@example.com", "EMAIL", None, "req-2").unwrap();
        assert_eq!(p1, p2);
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn test_distinct_values_distinct_placeholders() {
        let v = vault();
        let p1 = v.mint("alice@example.com", "EMAIL", None, "req").unwrap();
        let p2 = v.mint("bob@example.com", "EMAIL", None, "req").unwrap();
        assert_ne!(p1, p2);
        assert_eq!(p2, "\u{2039}EMAIL_2\u{203a}");
    }

    #[test]
    fn test_kinds_number_independently() {
        let v = vault();
        let e = v.mint("alice@example.com", "EMAIL", None, "req").unwrap();
        let p = v.mint("+1 555 867 5309", "PHONE", None, "req").unwrap();
        assert_eq!(e, "\u{2039}EMAIL_1\u{203a}");
        assert_eq!(p, "\u{2039}PHONE_1\u{203a}");
    }

    #[test]
    fn test_resolve_wrong_kind_fails() {
        let v = vault();
        let p = v.mint("alice@example.com", "EMAIL", None, "req").unwrap();
        let err = v.resolve(&p, "PHONE").unwrap_err();
        assert!(matches!(err, VaultError::KindMismatch { .. }));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let v = vault();
        assert!(matches!(
            v.resolve("\u{2039}EMAIL_9\u{203a}", "EMAIL"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_expired_record_swept_and_renumbered() {
        let v = vault();
        let p1 = v
            .mint("alice@example.com", "EMAIL", Some(Duration::seconds(-1)), "req")
            .unwrap();
        // Already expired: resolve fails, and a re-mint gets a fresh number.
        assert!(v.resolve(&p1, "EMAIL").is_err());
        let p2 = v.mint("alice@example.com", "EMAIL", None, "req").unwrap();
        assert_ne!(p1, p2);
        assert_eq!(v.resolve(&p2, "EMAIL").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_revoked_record_not_resolvable() {
        let v = vault();
        let p = v.mint("alice@example.com", "EMAIL", None, "req").unwrap();
        v.revoke(&p).unwrap();
        assert!(v.resolve(&p, "EMAIL").is_err());
        // Sweep removes it entirely.
        assert_eq!(v.sweep().unwrap(), 1);
        assert!(v.is_empty());
    }

    #[test]
    fn test_access_count_increments() {
        let v = vault();
        let p = v.mint("alice@example.com", "EMAIL", None, "req").unwrap();
        v.mint("alice@example.com", "EMAIL", None, "req").unwrap();
        v.resolve(&p, "EMAIL").unwrap();
        let record = v.store.get_record(&p).unwrap().unwrap();
        assert_eq!(record.access_count, 2);
    }

    #[test]
    fn test_concurrent_mints_agree() {
        let v = vault();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let v = v.clone();
            handles.push(std::thread::spawn(move || {
                v.mint("alice@example.com", "EMAIL", None, "req").unwrap()
            }));
        }
        let placeholders: Vec<String> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(placeholders.iter().all(|p| p == &placeholders[0]));
    }
}
