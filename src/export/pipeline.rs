//! Export producer task.
//!
//! [`ExportPipeline::prepare`] does everything that can still fail with a
//! normal error response. [`ExportPipeline::spawn`] then starts the producer
//! and hands back the receiving end of the byte channel.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use zeroize::Zeroizing;

use super::cipher::{StreamEncryptor, IV_LEN, KEY_LEN};
use super::{
    check_public_key, ExportError, ExportRequest, FileRecord, KeySelection, DEFAULT_CONCURRENCY,
    KEY_PREFIX, NOT_FOUND_CONTENT,
};
use crate::backend::{content_to_string, pages, BackendError, SecretBackend};
use crate::crypto::{encrypt_for_public_key, generate_random_bytes};

/// Default page size when listing a whole vault
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Chunks buffered between the producer and the response body
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// How a producer run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed { records: usize },
    /// A fetch or listing failed after streaming began
    Aborted { records: usize, error: String },
    /// The consumer went away
    Cancelled { records: usize },
}

/// A validated export, ready to stream.
pub struct PreparedExport {
    vault: String,
    selection: KeySelection,
    prefix: Bytes,
    key: Zeroizing<[u8; KEY_LEN]>,
    iv: [u8; IV_LEN],
}

impl PreparedExport {
    pub fn vault(&self) -> &str {
        &self.vault
    }
}

#[derive(Clone)]
pub struct ExportPipeline {
    backend: Arc<dyn SecretBackend>,
    concurrency: usize,
    page_size: usize,
    channel_capacity: usize,
}

impl ExportPipeline {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            backend,
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Validate the request and build the key-exchange prefix.
    pub fn prepare(&self, request: ExportRequest) -> Result<PreparedExport, ExportError> {
        request.validate()?;
        let public_key = check_public_key(&request.requester_public_key)?;

        let key = Zeroizing::new(generate_random_bytes::<KEY_LEN>());
        let iv: [u8; IV_LEN] = generate_random_bytes();

        let mut material = Zeroizing::new(Vec::with_capacity(KEY_LEN + IV_LEN));
        material.extend_from_slice(key.as_slice());
        material.extend_from_slice(&iv);

        let encrypted = encrypt_for_public_key(&public_key, &material)
            .map_err(|e| ExportError::InvalidPublicKey(e.to_string()))?;

        let mut prefix = Vec::with_capacity(KEY_PREFIX.len() + encrypted.len());
        prefix.extend_from_slice(KEY_PREFIX);
        prefix.extend_from_slice(&encrypted);

        Ok(PreparedExport {
            vault: request.vault_name,
            selection: request.key_ids,
            prefix: Bytes::from(prefix),
            key,
            iv,
        })
    }

    /// Start the producer. Dropping the receiver cancels the export.
    pub fn spawn(&self, prepared: PreparedExport) -> (mpsc::Receiver<Bytes>, JoinHandle<ExportOutcome>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let pipeline = self.clone();
        let handle = tokio::spawn(async move { pipeline.produce(prepared, tx).await });
        (rx, handle)
    }

    async fn produce(self, prepared: PreparedExport, tx: mpsc::Sender<Bytes>) -> ExportOutcome {
        let PreparedExport {
            vault,
            selection,
            prefix,
            key,
            iv,
        } = prepared;

        info!(
            vault = %vault,
            select_all = selection.is_all(),
            concurrency = self.concurrency,
            backend = self.backend.name(),
            "Export started"
        );

        if tx.send(prefix).await.is_err() {
            return cancelled(&vault, 0);
        }

        let mut encryptor = StreamEncryptor::new(&key, &iv);
        let backend = self.backend.clone();
        let fetch_vault = vault.clone();
        let mut records = key_ids(self.backend.clone(), vault.clone(), selection, self.page_size)
            .map(move |id| {
                let backend = backend.clone();
                let vault = fetch_vault.clone();
                async move {
                    match id {
                        Ok(id) => fetch_record(backend.as_ref(), &vault, id).await,
                        Err(e) => Err(ExportError::from(e)),
                    }
                }
            })
            .buffer_unordered(self.concurrency);

        let mut written = 0usize;
        let failure = loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => return cancelled(&vault, written),
                next = records.next() => next,
            };

            let record = match next {
                None => break None,
                Some(Ok(record)) => record,
                Some(Err(e)) => break Some(e),
            };

            let line = match encode_line(record) {
                Ok(line) => line,
                Err(e) => break Some(e),
            };

            let chunk = encryptor.update(&line);
            written += 1;
            if !chunk.is_empty() && tx.send(Bytes::from(chunk)).await.is_err() {
                return cancelled(&vault, written);
            }
        };
        // Stop any remaining fetches before the final write.
        drop(records);

        let mut tail = Vec::new();
        if let Some(e) = &failure {
            error!(vault = %vault, records = written, error = %e, "Export aborted");
            let mut frame = serde_json::to_vec(&serde_json::json!({ "error": e.to_string() }))
                .unwrap_or_default();
            frame.push(b'\n');
            tail.extend(encryptor.update(&frame));
        }
        tail.extend(encryptor.finalize());

        if tx.send(Bytes::from(tail)).await.is_err() {
            return cancelled(&vault, written);
        }

        match failure {
            Some(e) => ExportOutcome::Aborted {
                records: written,
                error: e.to_string(),
            },
            None => {
                info!(vault = %vault, records = written, "Export completed");
                ExportOutcome::Completed { records: written }
            }
        }
    }
}

fn cancelled(vault: &str, records: usize) -> ExportOutcome {
    info!(vault = %vault, records = records, "Export cancelled by client");
    ExportOutcome::Cancelled { records }
}

/// Ids to export, lazily resolved.
fn key_ids(
    backend: Arc<dyn SecretBackend>,
    vault: String,
    selection: KeySelection,
    page_size: usize,
) -> BoxStream<'static, Result<String, BackendError>> {
    match selection {
        KeySelection::All => pages(backend, vault, page_size)
            .map_ok(|names| stream::iter(names.into_iter().map(Ok)))
            .try_flatten()
            .boxed(),
        KeySelection::Specific(ids) => stream::iter(ids.into_iter().map(Ok)).boxed(),
    }
}

async fn fetch_record(
    backend: &dyn SecretBackend,
    vault: &str,
    key_id: String,
) -> Result<FileRecord, ExportError> {
    match backend.get(vault, &key_id).await {
        Ok(content) => Ok(FileRecord {
            content: content_to_string(vault, &key_id, content)?,
            key_id,
        }),
        Err(BackendError::NotFound { .. }) => {
            debug!(vault = %vault, key_id = %key_id, "Key not found, writing marker");
            Ok(FileRecord {
                key_id,
                content: NOT_FOUND_CONTENT.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn encode_line(record: FileRecord) -> Result<Vec<u8>, ExportError> {
    let mut line = serde_json::to_vec(&record.hashed()?)?;
    line.push(b'\n');
    Ok(line)
}
