//! Storage Health Monitor
//!
//! Periodically writes a probe file through the backend, reads it back and
//! tells the custody counterpart whether the vault is usable.
//!
//! - Probe ok: POST `{ url }` to the health-check endpoint
//! - Probe failed: POST `{ message: "System is inactive" }` to the inactive endpoint
//! - Shutdown: POST `{ message: "Server is going down" }` to the inactive endpoint
//!
//! Notifications carry the stored health-check key in `x-health-check-key`.
//! Notification failures are logged and otherwise ignored.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, SecretBackend};
use crate::custody::{
    CustodyClient, CustodyError, HEALTH_CHECK_KEY_HEADER, HEALTH_CHECK_PATH, INACTIVE_VAULT_PATH,
};
use crate::store::{keys, CredentialStore};

/// Vault used for probe files
pub const HEALTH_CHECK_VAULT: &str = "health-check";

/// Probe file name
pub const HEALTH_CHECK_FILE: &str = "health-check-test-file";

pub const INACTIVE_MESSAGE: &str = "System is inactive";
pub const SHUTDOWN_MESSAGE: &str = "Server is going down";

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to write probe file: {0}")]
    Write(#[source] BackendError),

    #[error("failed to read probe file: {0}")]
    Read(#[source] BackendError),

    #[error("probe content mismatch")]
    Mismatch,
}

pub struct HealthMonitor {
    backend: Arc<dyn SecretBackend>,
    custody: CustodyClient,
    store: Arc<CredentialStore>,
    server_url: String,
}

impl HealthMonitor {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        custody: CustodyClient,
        store: Arc<CredentialStore>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            custody,
            store,
            server_url: server_url.into(),
        }
    }

    /// Write a unique probe, read it back and compare.
    pub async fn probe(&self) -> Result<(), ProbeError> {
        let content = format!(
            "health-check-content-{}-{}",
            Utc::now().to_rfc3339(),
            uuid::Uuid::new_v4()
        );

        self.backend
            .put(HEALTH_CHECK_VAULT, HEALTH_CHECK_FILE, Bytes::from(content.clone()))
            .await
            .map_err(ProbeError::Write)?;

        let read = self
            .backend
            .get(HEALTH_CHECK_VAULT, HEALTH_CHECK_FILE)
            .await
            .map_err(ProbeError::Read)?;

        if read.as_ref() != content.as_bytes() {
            return Err(ProbeError::Mismatch);
        }
        Ok(())
    }

    /// Probe once and report the result. Returns whether the probe passed.
    pub async fn check_once(&self) -> bool {
        match self.probe().await {
            Ok(()) => {
                debug!(backend = self.backend.name(), "Storage probe passed");
                self.notify_healthy().await;
                true
            }
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "Storage probe failed");
                self.notify_inactive(INACTIVE_MESSAGE).await;
                false
            }
        }
    }

    /// Tell the counterpart the bridge is going away.
    pub async fn notify_shutdown(&self) {
        self.notify_inactive(SHUTDOWN_MESSAGE).await;
    }

    async fn notify_healthy(&self) {
        let body = json!({ "url": self.server_url });
        if let Err(e) = self.notify(HEALTH_CHECK_PATH, &body).await {
            warn!(error = %e, "Failed to send health notification");
        }
    }

    async fn notify_inactive(&self, message: &str) {
        let body = json!({ "message": message });
        match self.notify(INACTIVE_VAULT_PATH, &body).await {
            Ok(()) => info!(message = %message, "Sent inactive notification"),
            Err(e) => warn!(error = %e, "Failed to send inactive notification"),
        }
    }

    async fn notify(&self, path: &str, body: &serde_json::Value) -> Result<(), CustodyError> {
        let key = match self.store.latest_string(keys::HEALTH_CHECK_KEY, false).await {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(error = %e, "No health-check key yet");
                None
            }
        };

        let headers: Vec<(&str, &str)> = key
            .as_deref()
            .map(|k| vec![(HEALTH_CHECK_KEY_HEADER, k)])
            .unwrap_or_default();

        self.custody.post_json(path, body, &headers).await.map(|_| ())
    }
}

/// Spawn the probe loop: one probe immediately, then one per `interval`.
pub fn spawn_health_monitor(monitor: Arc<HealthMonitor>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Storage health monitor started");

    tokio::spawn(async move {
        loop {
            monitor.check_once().await;
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ListPage, MemoryBackend};
    use crate::store::{KdfParams, PutOptions, StoreConfig};
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Backend whose writes always fail.
    struct ReadOnlyBackend;

    #[async_trait::async_trait]
    impl SecretBackend for ReadOnlyBackend {
        fn name(&self) -> &'static str {
            "read-only"
        }

        async fn get(&self, folder: &str, name: &str) -> Result<Bytes, BackendError> {
            Err(BackendError::NotFound {
                folder: folder.into(),
                name: name.into(),
            })
        }

        async fn put(&self, _folder: &str, _name: &str, _content: Bytes) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("quota exceeded".into()))
        }

        async fn list_page(
            &self,
            _folder: &str,
            _page_size: usize,
            _cursor: Option<String>,
        ) -> Result<ListPage, BackendError> {
            Ok(ListPage::default())
        }
    }

    async fn monitor(
        dir: &TempDir,
        server: &MockServer,
        backend: Arc<dyn SecretBackend>,
    ) -> HealthMonitor {
        let store = CredentialStore::open(
            StoreConfig::new(dir.path().join("s.dat"), "secret").with_kdf(KdfParams::fast()),
        )
        .await
        .unwrap();
        store
            .put(keys::HEALTH_CHECK_KEY, json!("hck-1"), PutOptions::memory())
            .await
            .unwrap();

        HealthMonitor::new(
            backend,
            CustodyClient::new(&server.uri(), Duration::from_secs(5)).unwrap(),
            Arc::new(store),
            "http://bridge.test",
        )
    }

    #[tokio::test]
    async fn test_probe_round_trip() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let backend = Arc::new(MemoryBackend::new());
        let monitor = monitor(&dir, &server, backend.clone()).await;

        monitor.probe().await.unwrap();
        let stored = backend.get(HEALTH_CHECK_VAULT, HEALTH_CHECK_FILE).await.unwrap();
        assert!(String::from_utf8_lossy(&stored).starts_with("health-check-content-"));
    }

    #[tokio::test]
    async fn test_healthy_probe_reports_liveness() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{HEALTH_CHECK_PATH}")))
            .and(header(HEALTH_CHECK_KEY_HEADER, "hck-1"))
            .and(body_json(json!({ "url": "http://bridge.test" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/{INACTIVE_VAULT_PATH}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let monitor = monitor(&dir, &server, Arc::new(MemoryBackend::new())).await;
        assert!(monitor.check_once().await);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_failed_probe_reports_inactive() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{INACTIVE_VAULT_PATH}")))
            .and(header(HEALTH_CHECK_KEY_HEADER, "hck-1"))
            .and(body_json(json!({ "message": INACTIVE_MESSAGE })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let monitor = monitor(&dir, &server, Arc::new(ReadOnlyBackend)).await;
        assert!(!monitor.check_once().await);
        assert!(matches!(monitor.probe().await, Err(ProbeError::Write(_))));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_shutdown_notification() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{INACTIVE_VAULT_PATH}")))
            .and(body_json(json!({ "message": SHUTDOWN_MESSAGE })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let monitor = monitor(&dir, &server, Arc::new(MemoryBackend::new())).await;
        monitor.notify_shutdown().await;
        server.verify().await;
    }

    #[tokio::test]
    async fn test_notification_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let monitor = monitor(&dir, &server, Arc::new(MemoryBackend::new())).await;
        assert!(monitor.check_once().await);
    }
}
