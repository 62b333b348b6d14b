//! Custody counterpart client
//!
//! Thin JSON-over-HTTP client for the remote custody service. Every call is
//! a POST to `{CUSTODY_URL}/{path}`; anything other than a 2xx is an error.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Request a challenge key for our public key
pub const REQUEST_SECURE_CONNECTION_PATH: &str = "bridge-server/request-secure-connection";

/// Complete the handshake with the sealed payload
pub const HANDSHAKE_PATH: &str = "bridge-server/handshake";

/// Liveness report
pub const HEALTH_CHECK_PATH: &str = "backup-storage-integration/api-approval-health-check";

/// Inactivity report
pub const INACTIVE_VAULT_PATH: &str = "backup-storage-integration/inactive-vault";

/// Header carrying the health-check credential
pub const HEALTH_CHECK_KEY_HEADER: &str = "x-health-check-key";

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} responded with {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Client for the custody counterpart.
#[derive(Debug, Clone)]
pub struct CustodyClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl CustodyClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST `body` as JSON and return the parsed response.
    ///
    /// An empty response body is returned as `Value::Null`.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        headers: &[(&str, &str)],
    ) -> Result<Value, CustodyError> {
        let mut request = self.http_client.post(self.url(path)).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|source| CustodyError::Request {
            path: path.to_string(),
            source,
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| CustodyError::Request {
            path: path.to_string(),
            source,
        })?;

        debug!(path = %path, status = status.as_u16(), "Custody response");

        if !status.is_success() {
            return Err(CustodyError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| CustodyError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CustodyClient {
        CustodyClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_post_json_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bridge-server/handshake"))
            .and(body_json(json!({ "a": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server)
            .post_json(HANDSHAKE_PATH, &json!({ "a": 1 }), &[])
            .await
            .unwrap();
        assert_eq!(value, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_headers_are_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/backup-storage-integration/api-approval-health-check"))
            .and(header(HEALTH_CHECK_KEY_HEADER, "hck"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server)
            .post_json(
                HEALTH_CHECK_PATH,
                &json!({ "url": "http://bridge" }),
                &[(HEALTH_CHECK_KEY_HEADER, "hck")],
            )
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_non_success_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .post_json(INACTIVE_VAULT_PATH, &json!({}), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_base_url_trailing_slash() {
        let c = CustodyClient::new("http://custody/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.url("/bridge-server/handshake"), "http://custody/bridge-server/handshake");
    }
}
