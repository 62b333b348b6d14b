//! Streaming export endpoint
//!
//! Authenticated by the `x-verify-key` header. Once the request is accepted
//! the response is `200 application/octet-stream` and the body is produced
//! incrementally by the export pipeline; failures after that point are
//! reported inside the encrypted stream.

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::{Request, Response, StatusCode};
use subtle::ConstantTimeEq;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use super::parse_json;
use crate::export::ExportRequest;
use crate::handshake::resolve_verify_key;
use crate::server::{AppState, BoxBody};
use crate::types::BridgeError;

pub const VERIFY_KEY_HEADER: &str = "x-verify-key";

/// Compare the presented verify key with the one in effect.
async fn authorize(state: &AppState, req: &Request<Bytes>) -> Result<(), BridgeError> {
    let presented = req
        .headers()
        .get(VERIFY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BridgeError::Unauthorized("Missing verify key".into()))?;

    let expected = resolve_verify_key(&state.store, state.args.api_key.as_deref())
        .await
        .ok_or_else(|| BridgeError::Unauthorized("No verify key configured".into()))?;

    if !verify_key_matches(presented, &expected) {
        return Err(BridgeError::Unauthorized("Invalid verify key".into()));
    }
    Ok(())
}

/// Constant-time comparison of verify keys.
fn verify_key_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// POST /export
pub async fn handle_export(
    state: &AppState,
    req: Request<Bytes>,
) -> Result<Response<BoxBody>, BridgeError> {
    authorize(state, &req).await?;

    let request: ExportRequest = parse_json(&req)?;
    let prepared = state.export.prepare(request)?;
    let vault = prepared.vault().to_string();

    let (rx, producer) = state.export.spawn(prepared);

    tokio::spawn(async move {
        if let Err(e) = producer.await {
            error!(vault = %vault, error = %e, "Export producer panicked");
        }
    });

    let stream = ReceiverStream::new(rx).map(|chunk| Ok::<_, hyper::Error>(Frame::data(chunk)));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/octet-stream")
        .body(BodyExt::boxed(StreamBody::new(stream)))
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa_keys::test_support::test_public_pem;
    use crate::export::pipeline::test_support::open_export;
    use crate::export::NOT_FOUND_CONTENT;
    use crate::server::http::test_support::{post, test_state};
    use crate::store::{keys, PutOptions};
    use serde_json::json;
    use tempfile::TempDir;

    fn export_request(verify_key: Option<&str>, body: serde_json::Value) -> Request<Bytes> {
        let mut req = post("/export", body.to_string());
        if let Some(key) = verify_key {
            req.headers_mut().insert(VERIFY_KEY_HEADER, key.parse().unwrap());
        }
        req
    }

    fn body(key_ids: serde_json::Value) -> serde_json::Value {
        json!({
            "vaultName": "vault",
            "keyIds": key_ids,
            "requesterPublicKey": test_public_pem(),
        })
    }

    #[tokio::test]
    async fn test_export_streams_encrypted_records() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Some("api-key")).await;
        state.backend.put("vault", "1", Bytes::from("one")).await.unwrap();
        state.backend.put("vault", "2", Bytes::from("two")).await.unwrap();

        let req = export_request(Some("api-key"), body(json!([1, "2", "3"])));
        let response = handle_export(&state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/octet-stream"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let mut records = open_export(&bytes);
        records.sort_by(|a, b| a["keyId"].as_str().cmp(&b["keyId"].as_str()));

        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["content"], "one");
        assert_eq!(records[1]["content"], "two");
        assert_eq!(records[2]["content"], NOT_FOUND_CONTENT);
    }

    #[test]
    fn test_verify_key_matches() {
        assert!(verify_key_matches("verify-1", "verify-1"));
        assert!(!verify_key_matches("verify-2", "verify-1"));
        assert!(!verify_key_matches("verify-1-extra", "verify-1"));
        assert!(!verify_key_matches("", "verify-1"));
    }

    #[tokio::test]
    async fn test_wrong_verify_key_is_401() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Some("api-key")).await;
        let req = export_request(Some("api-kez"), body(json!([null])));
        let err = handle_export(&state, req).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stored_verify_key_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Some("api-key")).await;
        state
            .store
            .put(keys::VERIFY_KEY, json!("verify-1"), PutOptions::persisted())
            .await
            .unwrap();

        let req = export_request(Some("api-key"), body(json!([null])));
        let err = handle_export(&state, req).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let req = export_request(Some("verify-1"), body(json!([null])));
        assert!(handle_export(&state, req).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_verify_key_configured_is_401() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, None).await;
        let req = export_request(Some("anything"), body(json!([null])));
        let err = handle_export(&state, req).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_public_key_is_422() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Some("api-key")).await;
        let req = export_request(
            Some("api-key"),
            json!({
                "vaultName": "vault",
                "keyIds": [null],
                "requesterPublicKey": "not a key",
            }),
        );
        let err = handle_export(&state, req).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_missing_vault_name_is_422() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Some("api-key")).await;
        let req = export_request(
            Some("api-key"),
            json!({ "vaultName": "", "keyIds": [null], "requesterPublicKey": test_public_pem() }),
        );
        let err = handle_export(&state, req).await.err().unwrap();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
