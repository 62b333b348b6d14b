//! Handshake client: one full exchange per [`HandshakeClient::perform`].

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    resolve_verify_key, ChallengeRequest, ChallengeResponse, HandshakeError, HandshakePayload,
    HandshakeRequest, HandshakeResponse, HandshakeState, KeyPairStore, Session,
};
use crate::crypto::{decrypt_with_private_key, open_json, seal_json};
use crate::custody::{CustodyClient, HANDSHAKE_PATH, REQUEST_SECURE_CONNECTION_PATH};
use crate::store::{keys, CredentialStore, PutOptions};

/// Session key versions kept to tolerate rotation overlap
pub const SESSION_VERSIONS: usize = 2;

pub struct HandshakeClient {
    custody: CustodyClient,
    store: Arc<CredentialStore>,
    keys: KeyPairStore,
    /// Public URL of this bridge, sent to the counterpart
    server_url: String,
    /// Verify-key fallback
    api_key: Option<String>,
    state: watch::Sender<HandshakeState>,
}

impl HandshakeClient {
    pub fn new(
        custody: CustodyClient,
        store: Arc<CredentialStore>,
        keys: KeyPairStore,
        server_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let (state, _) = watch::channel(HandshakeState::Idle);
        Self {
            custody,
            store,
            keys,
            server_url: server_url.into(),
            api_key,
            state,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<HandshakeState> {
        self.state.subscribe()
    }

    fn transition(&self, next: HandshakeState) {
        let previous = self.state.send_replace(next);
        debug!(from = ?previous, to = ?next, "Handshake state");
    }

    /// Run the whole exchange once and store the resulting session.
    pub async fn perform(&self) -> Result<Session, HandshakeError> {
        match self.exchange().await {
            Ok(session) => {
                self.transition(HandshakeState::Established);
                info!(
                    expires_at = ?session.session_expiration_date,
                    "Handshake completed"
                );
                Ok(session)
            }
            Err(e) => {
                self.transition(HandshakeState::Failed);
                warn!(error = %e, "Handshake failed");
                Err(e)
            }
        }
    }

    async fn exchange(&self) -> Result<Session, HandshakeError> {
        let verify_key = resolve_verify_key(&self.store, self.api_key.as_deref()).await;
        let key_pair = self.keys.load_or_generate().await?;

        // Challenge
        self.transition(HandshakeState::RequestingChallenge);
        let response = self
            .custody
            .post_json(
                REQUEST_SECURE_CONNECTION_PATH,
                &ChallengeRequest {
                    public_key: &key_pair.public_pem,
                },
                &[],
            )
            .await?;
        let challenge: ChallengeResponse = parse(response)?;

        self.transition(HandshakeState::Decrypting);
        let encrypted_key = BASE64
            .decode(challenge.key.trim())
            .map_err(|e| HandshakeError::Protocol(format!("challenge key is not base64: {e}")))?;
        let shared = decrypt_with_private_key(&key_pair.private_key, &encrypted_key)?;
        let shared = String::from_utf8(shared)
            .map_err(|_| HandshakeError::Protocol("challenge key is not UTF-8".into()))?;

        // Payload
        self.transition(HandshakeState::SendingPayload);
        let sealed = seal_json(
            &shared,
            &HandshakePayload {
                public_key: key_pair.public_pem.clone(),
                server_url: self.server_url.clone(),
                verify_key,
            },
        )?;
        let request = HandshakeRequest {
            encrypted_payload: sealed,
            encryption_id: challenge.id,
        };

        self.transition(HandshakeState::AwaitingResponse);
        let response = self.custody.post_json(HANDSHAKE_PATH, &request, &[]).await?;
        let response: HandshakeResponse = parse(response)?;
        let session: Session = open_json(&shared, &response.encrypted_response)?;

        tokio::try_join!(
            self.store.put(
                keys::SESSION,
                Value::String(session.session_key.clone()),
                PutOptions::memory()
                    .versions(SESSION_VERSIONS)
                    .expires_at(session.session_expiration_date),
            ),
            self.store.put(
                keys::VERIFY_KEY,
                Value::String(session.verify_key.clone()),
                PutOptions::persisted(),
            ),
            self.store.put(
                keys::HEALTH_CHECK_KEY,
                Value::String(response.health_check_key.clone()),
                PutOptions::memory(),
            ),
        )?;

        Ok(session)
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, HandshakeError> {
    serde_json::from_value(value).map_err(|e| HandshakeError::Protocol(e.to_string()))
}
