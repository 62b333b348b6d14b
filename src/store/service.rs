//! Credential Store Service
//!
//! Owns the in-memory cache and the encrypted on-disk log.
//!
//! # Responsibilities
//!
//! - Rehydrate the cache from disk at startup
//! - Versioned, expiring `put` with optional persistence
//! - `get` from cache, optionally falling back to a backward scan of the log

use std::path::{Path, PathBuf};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::crypto::{KdfParams, RecordCipher};
use super::{valid_values, PutOptions, StoreError, StoredVersion, MAX_VERSIONS};

/// Configuration for the credential store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the encrypted log file
    pub path: PathBuf,
    /// Service-wide secret used to derive per-record keys
    pub secret: String,
    /// Key derivation cost
    pub kdf: KdfParams,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            secret: secret.into(),
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}

/// Encrypted, versioned, expiring credential store.
pub struct CredentialStore {
    /// Cache entries indexed by key, versions newest first
    cache: DashMap<String, Vec<StoredVersion>>,

    cipher: RecordCipher,

    path: PathBuf,

    /// Serializes whole-file rewrites
    disk_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open the store, creating an empty log if absent and rehydrating the
    /// cache from every decryptable line.
    ///
    /// A missing secret or an I/O error other than "file absent" is fatal.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let cipher = RecordCipher::new(&config.secret, config.kdf)?;
        let store = Self {
            cache: DashMap::new(),
            cipher,
            path: config.path,
            disk_lock: Mutex::new(()),
        };

        match tokio::fs::read_to_string(&store.path).await {
            Ok(data) => {
                let mut loaded = 0usize;
                for line in data.lines().filter(|l| !l.trim().is_empty()) {
                    match store.cipher.decrypt_entry(line) {
                        Ok(entry) => {
                            store.cache.insert(entry.key, entry.value);
                            loaded += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping invalid entry during initialization");
                        }
                    }
                }
                info!(
                    path = %store.path.display(),
                    entries = loaded,
                    "Credential store loaded"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                write_store_file(&store.path, "").await?;
                info!(path = %store.path.display(), "Created empty credential store");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(store)
    }

    /// Path of the on-disk log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a new version of `key`.
    ///
    /// The new version is prepended to the retained ones (when more than one
    /// version is kept), versions that already expired are dropped, and the
    /// list is truncated to `versions_to_store`.
    pub async fn put(&self, key: &str, value: Value, options: PutOptions) -> Result<(), StoreError> {
        if !(1..=MAX_VERSIONS).contains(&options.versions_to_store) {
            return Err(StoreError::InvalidVersions(options.versions_to_store));
        }

        // Hold the disk lock across the cache update so persisted order
        // matches cache order for concurrent writers.
        let _guard = if options.persist {
            Some(self.disk_lock.lock().await)
        } else {
            None
        };

        let now = Utc::now();
        let versions = {
            let mut entry = self.cache.entry(key.to_string()).or_default();
            let mut updated = vec![StoredVersion::new(value, options.expires_at)];
            if options.versions_to_store > 1 {
                updated.extend(entry.iter().cloned());
            }
            updated.retain(|v| v.is_valid_at(now));
            updated.truncate(options.versions_to_store);
            *entry = updated.clone();
            updated
        };

        debug!(
            key = %key,
            versions = versions.len(),
            persist = options.persist,
            "Stored credential"
        );

        if options.persist {
            let owned_key = key.to_string();
            let line = self
                .with_cipher(move |cipher| cipher.encrypt_entry(&owned_key, &versions))
                .await?;
            self.rewrite_with(key, line).await?;
        }

        Ok(())
    }

    /// Valid values of `key`, newest first.
    ///
    /// Fails with [`StoreError::NotFound`] when nothing valid remains.
    pub async fn get(&self, key: &str, allow_disk_fallback: bool) -> Result<Vec<Value>, StoreError> {
        let now = Utc::now();

        if let Some(versions) = self.cache.get(key) {
            let values = valid_values(&versions, now);
            return non_empty(key, values);
        }

        if !allow_disk_fallback {
            return Err(StoreError::NotFound(key.to_string()));
        }

        match self.read_from_disk(key).await? {
            Some(versions) => non_empty(key, valid_values(&versions, now)),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    /// Raw cached versions of `key`, including expired ones.
    pub fn cached_versions(&self, key: &str) -> Option<Vec<StoredVersion>> {
        self.cache.get(key).map(|v| v.clone())
    }

    /// Valid string values of `key`, newest first. Non-string values are skipped.
    pub async fn get_strings(
        &self,
        key: &str,
        allow_disk_fallback: bool,
    ) -> Result<Vec<String>, StoreError> {
        let values = self.get(key, allow_disk_fallback).await?;
        let strings: Vec<String> = values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect();
        non_empty(key, strings)
    }

    /// Newest valid string value of `key`.
    pub async fn latest_string(
        &self,
        key: &str,
        allow_disk_fallback: bool,
    ) -> Result<String, StoreError> {
        let mut strings = self.get_strings(key, allow_disk_fallback).await?;
        Ok(strings.remove(0))
    }

    /// Scan the log from the most recently written line backward.
    async fn read_from_disk(&self, key: &str) -> Result<Option<Vec<StoredVersion>>, StoreError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let key = key.to_string();
        self.with_cipher(move |cipher| {
            for line in data.lines().rev().filter(|l| !l.trim().is_empty()) {
                match cipher.decrypt_entry(line) {
                    Ok(entry) if entry.key == key => return Ok(Some(entry.value)),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Skipping invalid entry"),
                }
            }
            Ok(None)
        })
        .await
    }

    /// Run record crypto on the blocking pool. Each record costs one Argon2id
    /// derivation, which must not stall the async workers.
    async fn with_cipher<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&RecordCipher) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let cipher = self.cipher.clone();
        tokio::task::spawn_blocking(move || f(&cipher))
            .await
            .map_err(|e| StoreError::Crypto(format!("record crypto task failed: {e}")))?
    }

    /// Read-modify-write of the whole log: every other key's line is kept,
    /// this key's line is replaced and written last.
    async fn rewrite_with(&self, key: &str, new_line: String) -> Result<(), StoreError> {
        let existing = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let key = key.to_string();
        let mut lines: Vec<String> = self
            .with_cipher(move |cipher| {
                let mut kept = Vec::new();
                for line in existing.lines().filter(|l| !l.trim().is_empty()) {
                    match cipher.decrypt_entry(line) {
                        Ok(entry) if entry.key == key => {}
                        Ok(_) => kept.push(line.to_string()),
                        Err(e) => warn!(error = %e, "Dropping invalid entry during rewrite"),
                    }
                }
                Ok(kept)
            })
            .await?;
        lines.push(new_line);

        let mut contents = lines.join("\n");
        contents.push('\n');
        write_store_file(&self.path, &contents).await?;
        Ok(())
    }
}

fn non_empty<T>(key: &str, values: Vec<T>) -> Result<Vec<T>, StoreError> {
    if values.is_empty() {
        Err(StoreError::NotFound(key.to_string()))
    } else {
        Ok(values)
    }
}

/// Write the log via a temporary file and rename, owner read/write only.
async fn write_store_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension("tmp");
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp_path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    tokio::fs::rename(&tmp_path, path).await
}
