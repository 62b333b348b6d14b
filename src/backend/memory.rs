//! Process-local backend.
//!
//! Used for development and as the instrumented backend in tests: it can
//! inject a per-fetch delay and records how many fetches were in flight.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;

use super::{validate_name, BackendError, ListPage, SecretBackend};

/// In-memory vaults, names kept sorted so listing order is stable.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    vaults: RwLock<BTreeMap<String, BTreeMap<String, Bytes>>>,
    get_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `get`.
    pub fn with_get_delay(mut self, delay: Duration) -> Self {
        self.get_delay = Some(delay);
        self
    }

    /// Highest number of concurrent `get` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total `get` calls started.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// `get` calls currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the fetch future is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SecretBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, folder: &str, name: &str) -> Result<Bytes, BackendError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }

        let vaults = self.vaults.read().await;
        vaults
            .get(folder)
            .and_then(|vault| vault.get(name))
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                folder: folder.to_string(),
                name: name.to_string(),
            })
    }

    async fn put(&self, folder: &str, name: &str, content: Bytes) -> Result<(), BackendError> {
        validate_name(folder)?;
        validate_name(name)?;
        let mut vaults = self.vaults.write().await;
        vaults
            .entry(folder.to_string())
            .or_default()
            .insert(name.to_string(), content);
        Ok(())
    }

    async fn list_page(
        &self,
        folder: &str,
        page_size: usize,
        cursor: Option<String>,
    ) -> Result<ListPage, BackendError> {
        let vaults = self.vaults.read().await;
        let Some(vault) = vaults.get(folder) else {
            return Ok(ListPage::default());
        };

        let mut remaining = vault
            .keys()
            .filter(|name| cursor.as_deref().map_or(true, |c| name.as_str() > c));

        let names: Vec<String> = remaining.by_ref().take(page_size.max(1)).cloned().collect();
        let next_cursor = match (remaining.next(), names.last()) {
            (Some(_), Some(last)) => Some(last.clone()),
            _ => None,
        };

        Ok(ListPage { names, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_put_round_trip() {
        let backend = MemoryBackend::new();
        backend.put("vault", "1", Bytes::from("secret")).await.unwrap();
        assert_eq!(backend.get("vault", "1").await.unwrap(), Bytes::from("secret"));
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get("vault", "nope").await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
        assert_eq!(backend.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_list_page_exact_multiple_has_no_trailing_cursor() {
        let backend = MemoryBackend::new();
        for name in ["a", "b", "c", "d"] {
            backend.put("v", name, Bytes::new()).await.unwrap();
        }

        let first = backend.list_page("v", 2, None).await.unwrap();
        assert_eq!(first.names, vec!["a", "b"]);
        assert_eq!(first.next_cursor.as_deref(), Some("b"));

        let second = backend.list_page("v", 2, first.next_cursor).await.unwrap();
        assert_eq!(second.names, vec!["c", "d"]);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_in_flight_tracking() {
        let backend = std::sync::Arc::new(
            MemoryBackend::new().with_get_delay(Duration::from_millis(50)),
        );
        backend.put("v", "a", Bytes::new()).await.unwrap();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let b = backend.clone();
                tokio::spawn(async move { b.get("v", "a").await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(backend.get_calls(), 3);
        assert_eq!(backend.max_in_flight(), 3);
        assert_eq!(backend.in_flight(), 0);
    }
}
