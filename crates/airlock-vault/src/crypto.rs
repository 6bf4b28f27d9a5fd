//! Cryptographic primitives for the vault.
//!
//! Two keyed operations, both derived from the single process secret:
//!
//! - **Sealing** - AES-256-GCM with a random 96-bit nonce per record. The
//!   authenticated tag means a tampered ciphertext fails open-loud rather
//!   than decrypting to garbage.
//! - **Dedup hashing** - HMAC-SHA256 over (kind, original). Keyed so the
//!   hash index cannot be used as an offline dictionary against the vault
//!   file.
//!
//! ## References
//!
//! - NIST SP 800-38D (GCM mode)
//! - RFC 2104 (HMAC)

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::VaultError;
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

/// Separator byte between kind and value in the dedup hash preimage.
///
/// Prevents ("AB", "C") and ("A", "BC") from colliding.
const HASH_SEPARATOR: u8 = 0x1f;

/// GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Sealing and hashing keyed from the process secret.
#[derive(Clone)]
pub struct VaultCipher {
    cipher: Aes256Gcm,
    hash_key: [u8; 32],
}

impl VaultCipher {
    /// Derives the cipher and hash keys from the process secret.
    ///
    /// The secret can be any length; both keys are SHA-256 derivations with
    /// distinct domain prefixes.
    pub fn from_secret(secret: &[u8]) -> Self {
        let cipher_key = derive_key(b"airlock.vault.cipher", secret);
        let hash_key = derive_key(b"airlock.vault.hash", secret);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&cipher_key));
        Self { cipher, hash_key }
    }

    /// Encrypts a plaintext, returning (nonce, ciphertext).
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::Crypto("encryption failed".to_string()))?;
        Ok((nonce.to_vec(), ciphertext))
    }

    /// Decrypts a record's ciphertext.
    ///
    /// Fails if the nonce is malformed or the authentication tag does not
    /// verify (tampering or wrong key).
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(VaultError::Crypto("malformed nonce".to_string()));
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Crypto("decryption failed".to_string()))
    }

    /// Keyed dedup hash over (kind, original).
    pub fn value_hash(&self, kind: &str, original: &str) -> Vec<u8> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hash_key)
            .expect("HMAC-SHA256 accepts any key length");
        mac.update(kind.as_bytes());
        mac.update(&[HASH_SEPARATOR]);
        mac.update(original.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

impl std::fmt::Debug for VaultCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("VaultCipher").finish_non_exhaustive()
    }
}

fn derive_key(domain: &[u8], secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(secret);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = VaultCipher::from_secret(b"test-secret");
        let (nonce, ct) = cipher.seal(b"alice@example.com").unwrap();
        let pt = cipher.open(&nonce, &ct).unwrap();
        assert_eq!(pt, b"alice@example.com");
    }

    #[test]
    fn test_nonces_are_unique() {
        let cipher = VaultCipher::from_secret(b"test-secret");
        let (n1, _) = cipher.seal(b"x").unwrap();
        let (n2, _) = cipher.seal(b"x").unwrap();
        assert_ne!(n1, n2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = VaultCipher::from_secret(b"secret-a");
        let b = VaultCipher::from_secret(b"secret-b");
        let (nonce, ct) = a.seal(b"payload").unwrap();
        assert!(b.open(&nonce, &ct).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = VaultCipher::from_secret(b"test-secret");
        let (nonce, mut ct) = cipher.seal(b"payload").unwrap();
        ct[0] ^= 0xff;
        assert!(cipher.open(&nonce, &ct).is_err());
    }

    #[test]
    fn test_hash_is_keyed_and_separated() {
        let a = VaultCipher::from_secret(b"secret-a");
        let b = VaultCipher::from_secret(b"secret-b");
        assert_ne!(a.value_hash("EMAIL", "x"), b.value_hash("EMAIL", "x"));
        // Separator prevents boundary confusion.
        assert_ne!(a.value_hash("AB", "C"), a.value_hash("A", "BC"));
        // Same inputs, same hash.
        assert_eq!(a.value_hash("EMAIL", "x"), a.value_hash("EMAIL", "x"));
    }
}
