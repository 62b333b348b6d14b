//! Cryptographic primitives shared by the handshake, request decryption and
//! the export pipeline.
//!
//! # Algorithms
//!
//! - **Session payloads**: AES-256-GCM, key = SHA-256 of the shared secret string
//! - **Key exchange**: RSA-OAEP (SHA-256) over PEM encoded keys
//! - **Integrity**: SHA-256, lowercase hex

pub mod rsa_keys;
pub mod session;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub use rsa_keys::{decrypt_with_private_key, encrypt_for_public_key, parse_public_key};
pub use session::{open_json, open_payload, seal_json, seal_payload, EncryptedPayload};

/// Errors from the crypto helpers.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("hex decoding failed: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// SHA-256 digest as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; 32] = generate_random_bytes();
        let b: [u8; 32] = generate_random_bytes();
        assert_ne!(a, b);
    }
}
