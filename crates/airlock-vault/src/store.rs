//! # Persistent Storage Layer
//!
//! Sled-backed storage for the token vault. Three trees (namespaces):
//!
//! | Tree | Key | Value | Purpose |
//! |------|-----|-------|---------|
//! | `records` | placeholder | serialized TokenRecord | Record storage |
//! | `hashes` | 32-byte dedup hash | placeholder | Dedup index |
//! | `sequences` | kind label | big-endian u64 | Placeholder numbering |
//!
//! The only contract the vault needs from its store is an atomic
//! insert-or-get on the hash index, provided here by sled's
//! `compare_and_swap`. Everything else is plain keyed access.
//!
//! ## Security Notes
//!
//! - Record values hold ciphertext only; the store never sees plaintext.
//! - The database file should live on encrypted storage with permissions
//!   restricted to the gateway process.

use std::path::Path;

use crate::record::TokenRecord;
use crate::Result;

const RECORD_TREE: &str = "records";
const HASH_TREE: &str = "hashes";
const SEQUENCE_TREE: &str = "sequences";

/// Wrapper around a sled database for vault storage.
///
/// The underlying sled handles are thread-safe; `VaultStore` is `Clone` and
/// can be shared across requests.
#[derive(Clone)]
pub struct VaultStore {
    db: sled::Db,
    records: sled::Tree,
    hashes: sled::Tree,
    sequences: sled::Tree,
}

impl VaultStore {
    /// Opens or creates a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Creates an in-memory store for the test harness.
    ///
    /// Data is lost when the store is dropped.
    pub fn temporary() -> Result<Self> {
        let config = sled::Config::new().temporary(true);
        Self::from_db(config.open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let records = db.open_tree(RECORD_TREE)?;
        let hashes = db.open_tree(HASH_TREE)?;
        let sequences = db.open_tree(SEQUENCE_TREE)?;
        Ok(Self {
            db,
            records,
            hashes,
            sequences,
        })
    }

    /// Stores a record under its placeholder.
    pub fn put_record(&self, record: &TokenRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.records.insert(record.placeholder.as_bytes(), bytes)?;
        Ok(())
    }

    /// Loads a record by placeholder.
    pub fn get_record(&self, placeholder: &str) -> Result<Option<TokenRecord>> {
        match self.records.get(placeholder.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Removes a record. The hash index is released separately so that a
    /// mint which lost the claim race can drop its record without touching
    /// the winner's index entry.
    pub fn remove_record(&self, record: &TokenRecord) -> Result<()> {
        self.records.remove(record.placeholder.as_bytes())?;
        Ok(())
    }

    /// Looks up the placeholder registered for a dedup hash.
    pub fn get_by_hash(&self, hash: &[u8]) -> Result<Option<String>> {
        match self.hashes.get(hash)? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    /// Atomically claims a dedup hash for a placeholder.
    ///
    /// Returns true if this call won the slot; false if another placeholder
    /// already owns it. This is the linearization point for concurrent mints
    /// of the same (kind, original).
    pub fn claim_hash(&self, hash: &[u8], placeholder: &str) -> Result<bool> {
        let outcome = self.hashes.compare_and_swap(
            hash,
            None::<&[u8]>,
            Some(placeholder.as_bytes()),
        )?;
        Ok(outcome.is_ok())
    }

    /// Releases a dedup hash slot unconditionally (dangling-index repair).
    pub fn release_hash(&self, hash: &[u8]) -> Result<()> {
        self.hashes.remove(hash)?;
        Ok(())
    }

    /// Releases a dedup hash slot only if it still maps to `placeholder`.
    pub fn release_hash_owned(&self, hash: &[u8], placeholder: &str) -> Result<()> {
        let _ = self.hashes.compare_and_swap(
            hash,
            Some(placeholder.as_bytes()),
            None::<&[u8]>,
        )?;
        Ok(())
    }

    /// Next placeholder sequence number for a kind, starting at 1.
    pub fn next_sequence(&self, kind: &str) -> Result<u64> {
        let bytes = self.sequences.update_and_fetch(kind.as_bytes(), |old| {
            let current = old.map(decode_u64).unwrap_or(0);
            Some(current.saturating_add(1).to_be_bytes().to_vec())
        })?;
        Ok(bytes.map(|b| decode_u64(&b)).unwrap_or(1))
    }

    /// Iterates all records (sweeper path).
    pub fn records(&self) -> Result<Vec<TokenRecord>> {
        let mut out = Vec::new();
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Number of live record entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

impl std::fmt::Debug for VaultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultStore")
            .field("records", &self.len())
            .finish()
    }
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(buf)
}
