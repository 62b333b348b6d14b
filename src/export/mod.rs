//! Encrypted Export Pipeline
//!
//! Streams every requested secret of a vault to the caller, hybrid-encrypted
//! to the caller's RSA public key.
//!
//! # Output format
//!
//! ```text
//! ENCRYPTED_AES_KEY:<RSA-OAEP(aesKey || iv)><AES-256-CBC(records)>
//! ```
//!
//! The record stream is newline-delimited JSON, one
//! `{"hash","keyId","content"}` object per secret, where `hash` is the
//! SHA-256 of `{"keyId","content"}`. A failure after streaming has begun is
//! appended as a final `{"error": "..."}` line before the cipher is closed.
//!
//! # Architecture
//!
//! - Fetches run through `buffer_unordered(K)`: at most K in flight, records
//!   leave in completion order
//! - A bounded channel sits between the producer and the HTTP body; awaiting
//!   `send` stops both polling of fetches and dispatch of new ones
//! - A dropped receiver (client gone) ends the producer silently

pub mod cipher;
pub mod pipeline;
pub mod selection;

use serde::{Deserialize, Serialize};

use crate::backend::BackendError;
use crate::crypto::{encrypt_for_public_key, parse_public_key, CryptoError};

pub use pipeline::{ExportOutcome, ExportPipeline, PreparedExport};
pub use selection::KeySelection;

/// Literal that precedes the RSA-encrypted key material
pub const KEY_PREFIX: &[u8] = b"ENCRYPTED_AES_KEY:";

/// Content written for ids the backend does not have
pub const NOT_FOUND_CONTENT: &str = "File not found";

/// Default bound on concurrent backend fetches
pub const DEFAULT_CONCURRENCY: usize = 10;

const PUBLIC_KEY_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PUBLIC_KEY_FOOTER: &str = "-----END PUBLIC KEY-----";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("invalid requester public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid export request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("export crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("export serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Body of `POST /export`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub vault_name: String,
    pub key_ids: KeySelection,
    pub requester_public_key: String,
}

impl ExportRequest {
    /// Shape checks that do not need the backend.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.vault_name.trim().is_empty() {
            return Err(ExportError::InvalidRequest("vaultName is required".into()));
        }

        let pem = self.requester_public_key.trim();
        if !pem.starts_with(PUBLIC_KEY_HEADER) || !pem.ends_with(PUBLIC_KEY_FOOTER) {
            return Err(ExportError::InvalidPublicKey(
                "requesterPublicKey must be a PEM encoded public key".into(),
            ));
        }
        Ok(())
    }
}

/// Parse the requester key and prove it can encrypt.
pub fn check_public_key(pem: &str) -> Result<rsa::RsaPublicKey, ExportError> {
    let key = parse_public_key(pem).map_err(|e| ExportError::InvalidPublicKey(e.to_string()))?;
    encrypt_for_public_key(&key, b"test").map_err(|e| ExportError::InvalidPublicKey(e.to_string()))?;
    Ok(key)
}

/// One secret as fetched from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub key_id: String,
    pub content: String,
}

/// A record with its integrity hash, as written to the encrypted stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashedRecord {
    pub hash: String,
    pub key_id: String,
    pub content: String,
}

impl FileRecord {
    pub fn hashed(self) -> Result<HashedRecord, ExportError> {
        let json = serde_json::to_string(&self)?;
        Ok(HashedRecord {
            hash: crate::crypto::sha256_hex(json.as_bytes()),
            key_id: self.key_id,
            content: self.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa_keys::test_support::test_public_pem;
    use serde_json::json;

    fn request(pem: &str) -> ExportRequest {
        ExportRequest {
            vault_name: "vault".into(),
            key_ids: KeySelection::All,
            requester_public_key: pem.into(),
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let req: ExportRequest = serde_json::from_value(json!({
            "vaultName": "v",
            "keyIds": [null],
            "requesterPublicKey": "pem",
        }))
        .unwrap();
        assert_eq!(req.key_ids, KeySelection::All);
    }

    #[test]
    fn test_validate_pem_markers() {
        assert!(request(&test_public_pem()).validate().is_ok());
        assert!(matches!(
            request("ssh-rsa AAAA").validate(),
            Err(ExportError::InvalidPublicKey(_))
        ));
        let mut empty_vault = request(&test_public_pem());
        empty_vault.vault_name = " ".into();
        assert!(matches!(empty_vault.validate(), Err(ExportError::InvalidRequest(_))));
    }

    #[test]
    fn test_check_public_key_rejects_garbage_body() {
        let pem = "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----";
        assert!(request(pem).validate().is_ok());
        assert!(matches!(check_public_key(pem), Err(ExportError::InvalidPublicKey(_))));
        assert!(check_public_key(&test_public_pem()).is_ok());
    }

    #[test]
    fn test_hash_covers_key_id_and_content() {
        let record = FileRecord {
            key_id: "1".into(),
            content: "secret".into(),
        };
        let hashed = record.hashed().unwrap();
        assert_eq!(
            hashed.hash,
            crate::crypto::sha256_hex(br#"{"keyId":"1","content":"secret"}"#)
        );
        let json = serde_json::to_string(&hashed).unwrap();
        assert!(json.starts_with(r#"{"hash":"#));
    }
}
