//! Background handshake scheduling.
//!
//! The first handshake is retried every `retry_delay` until it succeeds.
//! After that the session is rotated every `rotation_interval`, each
//! rotation retried the same way. Failures never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::HandshakeClient;

/// Default delay between failed attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(20);

/// Default session rotation period (45 minutes)
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(45 * 60);

#[derive(Debug, Clone, Copy)]
pub struct HandshakeSchedule {
    pub retry_delay: Duration,
    pub rotation_interval: Duration,
}

impl Default for HandshakeSchedule {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
        }
    }
}

/// Perform handshakes until one succeeds. Returns the number of attempts.
pub async fn establish_with_retry(client: &HandshakeClient, retry_delay: Duration) -> u32 {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match client.perform().await {
            Ok(_) => return attempts,
            Err(e) => {
                warn!(
                    attempt = attempts,
                    retry_in_secs = retry_delay.as_secs_f64(),
                    error = %e,
                    "Handshake attempt failed, retrying"
                );
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

/// Spawn the handshake loop.
pub fn spawn_handshake_task(
    client: Arc<HandshakeClient>,
    schedule: HandshakeSchedule,
) -> JoinHandle<()> {
    info!(
        retry_secs = schedule.retry_delay.as_secs(),
        rotation_secs = schedule.rotation_interval.as_secs(),
        "Handshake task started"
    );

    tokio::spawn(async move {
        loop {
            let attempts = establish_with_retry(&client, schedule.retry_delay).await;
            info!(attempts = attempts, "Session established");
            tokio::time::sleep(schedule.rotation_interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::REQUEST_SECURE_CONNECTION_PATH;
    use crate::handshake::client::test_support::{fixture, mount_handshake, responder};
    use crate::handshake::HandshakeState;
    use crate::store::keys;
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_failed_first_attempt_retries_once() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;

        // First challenge request fails, later ones fall through to the
        // working counterpart.
        Mock::given(method("POST"))
            .and(path(format!("/{REQUEST_SECURE_CONNECTION_PATH}")))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        let expires_at = Utc::now() + ChronoDuration::minutes(30);
        mount_handshake(&server, responder(expires_at)).await;

        let client = Arc::new(fixture(&dir, &server).await);
        let mut state = client.subscribe();
        let retry_delay = Duration::from_millis(300);
        let started = std::time::Instant::now();

        let handle = spawn_handshake_task(
            client.clone(),
            HandshakeSchedule {
                retry_delay,
                rotation_interval: Duration::from_secs(3600),
            },
        );

        tokio::time::timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == HandshakeState::Established),
        )
        .await
        .expect("handshake should be established")
        .unwrap();
        assert!(started.elapsed() >= retry_delay);

        // Give a spurious extra attempt the chance to show up.
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let challenge_requests = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == format!("/{REQUEST_SECURE_CONNECTION_PATH}"))
            .count();
        assert_eq!(challenge_requests, 2);

        let store = client.store();
        assert_eq!(store.latest_string(keys::SESSION, false).await.unwrap(), "session-1");
        assert_eq!(store.latest_string(keys::VERIFY_KEY, false).await.unwrap(), "verify-1");
        assert_eq!(
            store.latest_string(keys::HEALTH_CHECK_KEY, false).await.unwrap(),
            "health-1"
        );
        assert_eq!(
            store.cached_versions(keys::SESSION).unwrap()[0].expires_at,
            Some(expires_at)
        );
        server.verify().await;
    }

    #[tokio::test]
    async fn test_establish_counts_attempts() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/{REQUEST_SECURE_CONNECTION_PATH}")))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_handshake(&server, responder(Utc::now() + ChronoDuration::minutes(5))).await;

        let client = fixture(&dir, &server).await;
        let attempts = establish_with_retry(&client, Duration::from_millis(10)).await;
        assert_eq!(attempts, 3);
    }
}
