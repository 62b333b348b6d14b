//! HTTP routes for the custody bridge
//!
//! - `GET /health`   - liveness, handshake state
//! - `POST /healthz` - liveness for the counterpart, body sealed with the health-check key
//! - `POST /get-key` - read a secret, body and reply sealed with the session key
//! - `POST /set-key` - store a secret, body sealed with the session key
//! - `POST /export`  - streaming hybrid-encrypted export, `x-verify-key` authenticated

pub mod export;
pub mod health;
pub mod keys;

use bytes::Bytes;
use hyper::Request;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::crypto::{open_json, EncryptedPayload};
use crate::types::BridgeError;

/// First value of a query parameter.
pub(crate) fn query_param(req: &Request<Bytes>, name: &str) -> Option<String> {
    let query = req.uri().query()?;
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .ok()?
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
}

/// Parse the body as JSON.
pub(crate) fn parse_json<T: DeserializeOwned>(req: &Request<Bytes>) -> Result<T, BridgeError> {
    serde_json::from_slice(req.body())
        .map_err(|e| BridgeError::Validation(format!("Invalid request body: {e}")))
}

/// Open a sealed body with the first key that authenticates it, trying keys
/// in the order given (newest first).
pub(crate) fn open_with_any_key(
    keys: &[String],
    payload: &EncryptedPayload,
) -> Result<Value, BridgeError> {
    keys.iter()
        .find_map(|key| open_json::<Value>(key, payload).ok())
        .ok_or_else(|| BridgeError::Unauthorized("Failed to decrypt request body".into()))
}
