//! Session Handshake
//!
//! Establishes and rotates the symmetric session shared with the custody
//! counterpart.
//!
//! # Protocol
//!
//! 1. Load (or generate once) the local RSA key pair
//! 2. Send our public key; receive `{ id, key }` where `key` is the
//!    challenge secret encrypted to us
//! 3. Decrypt the challenge secret `K` with our private key
//! 4. Seal `{ publicKey, serverUrl, verifyKey }` under `K` and send it with `id`
//! 5. Open `encryptedResponse` under `K` to get the session
//! 6. Store `session` (2 versions, expiring), `verify-key` (persisted) and
//!    `health-check-key`
//!
//! Any failing step leaves the client in [`HandshakeState::Failed`]; the
//! scheduling task retries the whole exchange.

pub mod client;
pub mod keypair;
pub mod task;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{CryptoError, EncryptedPayload};
use crate::custody::CustodyError;
use crate::store::{keys, CredentialStore, StoreError};

pub use client::HandshakeClient;
pub use keypair::{KeyPairStore, LocalKeyPair};
pub use task::{spawn_handshake_task, HandshakeSchedule};

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("key pair error: {0}")]
    KeyPair(String),

    #[error("key pair I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("custody request failed: {0}")]
    Custody(#[from] CustodyError),

    #[error("unexpected handshake response: {0}")]
    Protocol(String),

    #[error("failed to store session: {0}")]
    Store(#[from] StoreError),
}

/// Progress of the current (or last) handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    Idle,
    RequestingChallenge,
    Decrypting,
    SendingPayload,
    AwaitingResponse,
    Established,
    Failed,
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChallengeRequest<'a> {
    pub public_key: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChallengeResponse {
    pub id: serde_json::Value,
    /// Base64 RSA-OAEP ciphertext of the challenge secret
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HandshakePayload {
    pub public_key: String,
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HandshakeRequest {
    pub encrypted_payload: EncryptedPayload,
    pub encryption_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HandshakeResponse {
    pub encrypted_response: EncryptedPayload,
    pub health_check_key: String,
}

/// Session material returned by the counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_key: String,
    #[serde(default)]
    pub session_expiration_date: Option<DateTime<Utc>>,
    pub verify_key: String,
}

/// Verify key in effect: the stored one (disk fallback allowed), else the
/// configured `API_KEY`.
pub async fn resolve_verify_key(
    store: &CredentialStore,
    api_key: Option<&str>,
) -> Option<String> {
    match store.latest_string(keys::VERIFY_KEY, true).await {
        Ok(key) => Some(key),
        Err(e) => {
            debug!(error = %e, "Verify key not in store, using API_KEY");
            api_key.filter(|k| !k.is_empty()).map(str::to_string)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KdfParams, PutOptions, StoreConfig};
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> CredentialStore {
        CredentialStore::open(
            StoreConfig::new(dir.path().join("s.dat"), "secret").with_kdf(KdfParams::fast()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_verify_key_prefers_store() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        store
            .put(keys::VERIFY_KEY, serde_json::json!("stored"), PutOptions::persisted())
            .await
            .unwrap();
        assert_eq!(
            resolve_verify_key(&store, Some("env")).await.as_deref(),
            Some("stored")
        );
    }

    #[tokio::test]
    async fn test_verify_key_falls_back_to_api_key() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        assert_eq!(resolve_verify_key(&store, Some("env")).await.as_deref(), Some("env"));
        assert_eq!(resolve_verify_key(&store, Some("")).await, None);
        assert_eq!(resolve_verify_key(&store, None).await, None);
    }

    #[test]
    fn test_payload_omits_missing_verify_key() {
        let payload = HandshakePayload {
            public_key: "pk".into(),
            server_url: "http://bridge".into(),
            verify_key: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "publicKey": "pk", "serverUrl": "http://bridge" }));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(HandshakeState::RequestingChallenge).unwrap(),
            serde_json::json!("requesting_challenge")
        );
    }
}
