//! Liveness endpoints

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode};
use serde_json::json;

use super::{open_with_any_key, parse_json};
use crate::crypto::EncryptedPayload;
use crate::server::http::json_response;
use crate::server::AppState;
use crate::store::keys;
use crate::types::BridgeError;

/// GET /health - local status, no authentication.
pub fn handle_health(state: &AppState) -> Response<Full<Bytes>> {
    let handshake = state.handshake.state();
    let body = json!({
        "healthy": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": state.started_at.elapsed().as_secs(),
        "handshake": handshake,
        "backend": state.backend.name(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    json_response(StatusCode::OK, &body)
}

/// POST /healthz - the counterpart proves it holds the health-check key.
pub async fn handle_healthz(
    state: &AppState,
    req: Request<Bytes>,
) -> Result<Response<Full<Bytes>>, BridgeError> {
    let payload: EncryptedPayload = parse_json(&req)?;
    let key = state
        .store
        .latest_string(keys::HEALTH_CHECK_KEY, false)
        .await
        .map_err(|_| BridgeError::Unauthorized("No health-check key".into()))?;

    open_with_any_key(std::slice::from_ref(&key), &payload)?;

    Ok(json_response(
        StatusCode::OK,
        &json!({ "status": "OK", "message": "Service is up and running." }),
    ))
}
