//! Session-protected key endpoints
//!
//! Both endpoints take a body sealed with the current session key. During
//! rotation the previous session key is still accepted.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{open_with_any_key, parse_json, query_param};
use crate::backend::content_to_string;
use crate::crypto::{seal_json, EncryptedPayload};
use crate::server::http::json_response;
use crate::server::AppState;
use crate::store::keys;
use crate::types::BridgeError;

#[derive(Debug, Deserialize)]
struct GetKeyBody {
    #[serde(default)]
    key_id: Value,
}

#[derive(Debug, Deserialize)]
struct SetKeyBody {
    #[serde(default)]
    key_id: Value,
    #[serde(default)]
    key: Value,
}

/// Numeric key id, as a string. Accepts JSON numbers and numeric strings.
fn numeric_key_id(value: &Value) -> Result<String, BridgeError> {
    let id = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => String::new(),
    };
    if id.is_empty() || id.parse::<f64>().map_or(true, |n| !n.is_finite()) {
        return Err(BridgeError::Validation("key_id must be numeric".into()));
    }
    Ok(id)
}

fn folder_name(req: &Request<Bytes>) -> Result<String, BridgeError> {
    query_param(req, "folder_name")
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| BridgeError::Validation("folder_name is required".into()))
}

/// Session keys, newest first. No session means the caller cannot be trusted.
async fn session_keys(state: &AppState) -> Result<Vec<String>, BridgeError> {
    state
        .store
        .get_strings(keys::SESSION, false)
        .await
        .map_err(|_| BridgeError::Unauthorized("No active session".into()))
}

async fn open_session_body(state: &AppState, req: &Request<Bytes>) -> Result<(Vec<String>, Value), BridgeError> {
    let payload: EncryptedPayload = parse_json(req)?;
    let keys = session_keys(state).await?;
    let body = open_with_any_key(&keys, &payload)?;
    Ok((keys, body))
}

/// POST /get-key?folder_name=F
pub async fn handle_get_key(
    state: &AppState,
    req: Request<Bytes>,
) -> Result<Response<Full<Bytes>>, BridgeError> {
    let (keys, body) = open_session_body(state, &req).await?;
    let folder = folder_name(&req)?;
    let body: GetKeyBody = serde_json::from_value(body)?;
    let key_id = numeric_key_id(&body.key_id)?;

    info!(folder = %folder, key_id = %key_id, "get-key");
    let content = state.backend.get(&folder, &key_id).await?;
    let private_key = content_to_string(&folder, &key_id, content)?;

    let sealed = seal_json(&keys[0], &json!({ "private_key": private_key }))
    .map_err(|e| BridgeError::Internal(e.to_string()))?;

    Ok(json_response(StatusCode::OK, &serde_json::to_value(sealed)?))
}

/// POST /set-key?folder_name=F
pub async fn handle_set_key(
    state: &AppState,
    req: Request<Bytes>,
) -> Result<Response<Full<Bytes>>, BridgeError> {
    let folder = folder_name(&req)?;
    let (_, body) = open_session_body(state, &req).await?;
    let body: SetKeyBody = serde_json::from_value(body)?;
    let key_id = numeric_key_id(&body.key_id)?;
    let key = match body.key {
        Value::String(s) if !s.is_empty() => s,
        _ => return Err(BridgeError::Validation("key must be a non-empty string".into())),
    };

    state.backend.put(&folder, &key_id, Bytes::from(key)).await?;
    info!(folder = %folder, key_id = %key_id, "set-key");

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(b"Key uploaded successfully")))
        .unwrap())
}
