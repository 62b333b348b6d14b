//! Record encryption for the on-disk credential log.
//!
//! # Algorithms
//!
//! - **Key Derivation**: Argon2id over the service-wide store secret, fresh
//!   random salt per record
//! - **Encryption**: ChaCha20-Poly1305 (authenticated), fresh random nonce per record
//!
//! # Line format
//!
//! One record per line: `ivHex:cipherHex:saltHex`. The plaintext is the JSON
//! document `{ "key": ..., "value": [versions...] }`.

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{StoreError, StoredVersion};
use crate::crypto::generate_random_bytes;

// =============================================================================
// Constants
// =============================================================================

/// Argon2id memory cost in KiB (64 MB)
pub const ARGON2_MEMORY_KB: u32 = 65536;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id parallelism (threads)
pub const ARGON2_PARALLELISM: u32 = 4;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Derived key length (32 bytes)
pub const DERIVED_KEY_LEN: usize = 32;

// =============================================================================
// Key Derivation Parameters
// =============================================================================

/// Argon2id cost parameters used for every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: ARGON2_MEMORY_KB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Minimal cost, for tests only.
    #[cfg(test)]
    pub fn fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

// =============================================================================
// Disk Entry
// =============================================================================

/// Decrypted content of one on-disk line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEntry {
    pub key: String,
    pub value: Vec<StoredVersion>,
}

// =============================================================================
// Record Cipher
// =============================================================================

/// Encrypts and decrypts credential log lines with the store secret.
#[derive(Clone)]
pub struct RecordCipher {
    secret: Arc<Zeroizing<String>>,
    params: KdfParams,
}

impl RecordCipher {
    /// Build a cipher. An empty secret is a configuration error.
    pub fn new(secret: &str, params: KdfParams) -> Result<Self, StoreError> {
        if secret.is_empty() {
            return Err(StoreError::MissingSecret);
        }

        Ok(Self {
            secret: Arc::new(Zeroizing::new(secret.to_string())),
            params,
        })
    }

    fn derive_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, StoreError> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(DERIVED_KEY_LEN),
        )
        .map_err(|e| StoreError::Crypto(format!("Invalid Argon2 params: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        argon2
            .hash_password_into(self.secret.as_bytes(), salt, &mut key[..])
            .map_err(|e| StoreError::Crypto(format!("Key derivation failed: {e}")))?;

        Ok(key)
    }

    /// Encrypt the full version list of `key` into a single log line.
    pub fn encrypt_entry(&self, key: &str, versions: &[StoredVersion]) -> Result<String, StoreError> {
        let plaintext = Zeroizing::new(serde_json::to_vec(&DiskEntry {
            key: key.to_string(),
            value: versions.to_vec(),
        })?);

        let salt: [u8; SALT_LEN] = generate_random_bytes();
        let nonce: [u8; NONCE_LEN] = generate_random_bytes();
        let derived = self.derive_key(&salt)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(derived.as_slice()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| StoreError::Crypto(format!("Encryption failed: {e}")))?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(ciphertext),
            hex::encode(salt)
        ))
    }

    /// Decrypt one log line.
    pub fn decrypt_entry(&self, line: &str) -> Result<DiskEntry, StoreError> {
        let mut parts = line.trim().split(':');
        let (Some(iv_hex), Some(cipher_hex), Some(salt_hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(StoreError::CorruptRecord("expected iv:ciphertext:salt".into()));
        };

        let nonce = hex::decode(iv_hex).map_err(|e| StoreError::CorruptRecord(e.to_string()))?;
        let ciphertext =
            hex::decode(cipher_hex).map_err(|e| StoreError::CorruptRecord(e.to_string()))?;
        let salt = hex::decode(salt_hex).map_err(|e| StoreError::CorruptRecord(e.to_string()))?;

        if nonce.len() != NONCE_LEN {
            return Err(StoreError::CorruptRecord(format!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_LEN,
                nonce.len()
            )));
        }

        let derived = self.derive_key(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(derived.as_slice()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| StoreError::CorruptRecord("authentication failed".into()))?,
        );

        serde_json::from_slice(&plaintext).map_err(|e| StoreError::CorruptRecord(e.to_string()))
    }
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher")
            .field("secret", &"[REDACTED]")
            .field("params", &self.params)
            .finish()
    }
}
