//! Secret Backend Capability
//!
//! The bridge never talks to a storage provider directly. Everything goes
//! through [`SecretBackend`]: fetch or store a named blob inside a vault
//! folder, and list a vault one page at a time.
//!
//! # Architecture
//!
//! - One trait, one implementation per provider, selected at startup by `HANDLER`
//! - Listing is cursor-based; [`pages`] adapts it into a lazy stream that is
//!   restartable per call
//! - "Not found" is a distinct error so callers can degrade instead of abort

pub mod local;
pub mod memory;

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, Stream};
use tracing::warn;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Errors reported by a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("file '{name}' not found in vault '{folder}'")]
    NotFound { folder: String, name: String },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("file '{name}' in vault '{folder}' is not valid UTF-8")]
    InvalidContent { folder: String, name: String },
}

/// One page of a vault listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub names: Vec<String>,
    /// Cursor for the next page; `None` on the last page
    pub next_cursor: Option<String>,
}

/// Storage capability consumed by the export pipeline, the key routes and
/// the health monitor.
#[async_trait::async_trait]
pub trait SecretBackend: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    /// Retrieve a blob. Fails with [`BackendError::NotFound`] if absent.
    async fn get(&self, folder: &str, name: &str) -> Result<Bytes, BackendError>;

    /// Store a blob, replacing any previous content.
    async fn put(&self, folder: &str, name: &str, content: Bytes) -> Result<(), BackendError>;

    /// List one page of names in `folder`, starting after `cursor`.
    async fn list_page(
        &self,
        folder: &str,
        page_size: usize,
        cursor: Option<String>,
    ) -> Result<ListPage, BackendError>;
}

/// Lazy page stream over a vault listing.
///
/// Each call starts a fresh listing; the next page is only requested once
/// the consumer polls for it.
pub fn pages(
    backend: Arc<dyn SecretBackend>,
    folder: String,
    page_size: usize,
) -> impl Stream<Item = Result<Vec<String>, BackendError>> + Send + 'static {
    enum Cursor {
        Start,
        Next(String),
        Done,
    }

    stream::try_unfold(Cursor::Start, move |cursor| {
        let backend = backend.clone();
        let folder = folder.clone();
        async move {
            let cursor = match cursor {
                Cursor::Start => None,
                Cursor::Next(c) => Some(c),
                Cursor::Done => return Ok(None),
            };

            let page = backend.list_page(&folder, page_size, cursor).await?;
            let next = match page.next_cursor {
                Some(c) => Cursor::Next(c),
                None => Cursor::Done,
            };
            Ok(Some((page.names, next)))
        }
    })
}

/// Secret content as text. Bytes that are not UTF-8 are an error, never
/// replaced, so record hashes always cover what the backend holds.
pub fn content_to_string(folder: &str, name: &str, content: Bytes) -> Result<String, BackendError> {
    String::from_utf8(content.to_vec()).map_err(|_| {
        warn!(vault = %folder, key_id = %name, "Backend content is not valid UTF-8");
        BackendError::InvalidContent {
            folder: folder.to_string(),
            name: name.to_string(),
        }
    })
}

/// Reject names that could escape a vault directory.
pub fn validate_name(name: &str) -> Result<(), BackendError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(BackendError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Build the backend named by `handler`.
pub fn from_handler(
    handler: &str,
    storage_root: &std::path::Path,
) -> Result<Arc<dyn SecretBackend>, BackendError> {
    match handler {
        "local" => Ok(Arc::new(LocalBackend::new(storage_root))),
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        other => Err(BackendError::Unavailable(format!(
            "unknown handler '{other}' (expected local or memory)"
        ))),
    }
}
