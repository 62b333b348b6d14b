//! AES-256-GCM envelopes keyed by a shared secret string.
//!
//! The wire shape is `{ iv, encryptedData, authTag }`, each lowercase hex.
//! This is what the custody counterpart sends during the handshake and what
//! inbound session-protected requests carry.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{generate_random_bytes, CryptoError};

/// GCM nonce length (12 bytes)
pub const GCM_NONCE_LEN: usize = 12;

/// GCM authentication tag length (16 bytes)
pub const GCM_TAG_LEN: usize = 16;

/// Encrypted payload exchanged with the custody counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub iv: String,
    pub encrypted_data: String,
    pub auth_tag: String,
}

fn cipher_for(secret: &str) -> Aes256Gcm {
    let key = Sha256::digest(secret.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()))
}

/// Encrypt raw bytes under a shared secret with a fresh random nonce.
pub fn seal_payload(secret: &str, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError> {
    let nonce: [u8; GCM_NONCE_LEN] = generate_random_bytes();
    let mut sealed = cipher_for(secret)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);

    Ok(EncryptedPayload {
        iv: hex::encode(nonce),
        encrypted_data: hex::encode(sealed),
        auth_tag: hex::encode(tag),
    })
}

/// Decrypt an envelope produced by [`seal_payload`] (or the counterpart).
pub fn open_payload(secret: &str, payload: &EncryptedPayload) -> Result<Vec<u8>, CryptoError> {
    let nonce = hex::decode(&payload.iv)?;
    if nonce.len() != GCM_NONCE_LEN {
        return Err(CryptoError::Decryption(format!(
            "nonce must be {} bytes, got {}",
            GCM_NONCE_LEN,
            nonce.len()
        )));
    }

    let mut combined = hex::decode(&payload.encrypted_data)?;
    let tag = hex::decode(&payload.auth_tag)?;
    if tag.len() != GCM_TAG_LEN {
        return Err(CryptoError::Decryption("authentication tag length mismatch".into()));
    }
    combined.extend_from_slice(&tag);

    cipher_for(secret)
        .decrypt(Nonce::from_slice(&nonce), combined.as_ref())
        .map_err(|_| CryptoError::Decryption("authentication failed".into()))
}

/// Serialize `value` as JSON and seal it.
pub fn seal_json<T: Serialize>(secret: &str, value: &T) -> Result<EncryptedPayload, CryptoError> {
    let json = serde_json::to_vec(value).map_err(|e| CryptoError::Encryption(e.to_string()))?;
    seal_payload(secret, &json)
}

/// Open a payload and parse the plaintext as JSON.
pub fn open_json<T: DeserializeOwned>(
    secret: &str,
    payload: &EncryptedPayload,
) -> Result<T, CryptoError> {
    let plaintext = open_payload(secret, payload)?;
    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::Decryption(e.to_string()))
}
