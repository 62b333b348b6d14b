//! RSA-OAEP helpers over PEM encoded keys.
//!
//! OAEP uses SHA-1 for both the label hash and MGF1, the padding Node's
//! `publicEncrypt` / `privateDecrypt` apply by default, so custody
//! counterparts and export requesters built on it interoperate.

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use super::CryptoError;

/// Parse an SPKI PEM (`-----BEGIN PUBLIC KEY-----`) public key.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Parse a PKCS#8 PEM private key.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Encrypt a short message for the holder of `public_key`.
pub fn encrypt_for_public_key(
    public_key: &RsaPublicKey,
    message: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), message)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Decrypt an OAEP ciphertext with our private key.
pub fn decrypt_with_private_key(
    private_key: &RsaPrivateKey,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha1>(), ciphertext)
        .map_err(|e| CryptoError::Decryption(e.to_string()))
}
