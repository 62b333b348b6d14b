//! Encrypted Credential Store
//!
//! Versioned, optionally expiring key/value storage for the handful of
//! long-lived credentials the bridge holds (session keys, verify key,
//! health-check key).
//!
//! # Architecture
//!
//! - The in-memory cache is authoritative and is what `get` reads first
//! - Persisting writes rewrite the whole on-disk log, one encrypted line per key
//! - Corrupt lines are logged and skipped; they never fail a read
//! - Expired versions are filtered on read, not purged eagerly

pub mod crypto;
pub mod service;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crypto::{DiskEntry, KdfParams, RecordCipher};
pub use service::{CredentialStore, StoreConfig};

/// Maximum number of versions a single key may retain.
pub const MAX_VERSIONS: usize = 10;

/// Well-known keys written by the handshake.
pub mod keys {
    /// Symmetric session key shared with the custody counterpart
    pub const SESSION: &str = "session";
    /// Verify key used to authenticate administrative calls
    pub const VERIFY_KEY: &str = "verify-key";
    /// Credential for liveness / inactivity notifications
    pub const HEALTH_CHECK_KEY: &str = "health-check-key";
}

/// Errors from the credential store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SECURE_STORE_SECRET is not set")]
    MissingSecret,

    #[error("versions_to_store must be between 1 and {MAX_VERSIONS}, got {0}")]
    InvalidVersions(usize),

    #[error("value not found for key '{0}'")]
    NotFound(String),

    #[error("corrupt store record: {0}")]
    CorruptRecord(String),

    #[error("store crypto error: {0}")]
    Crypto(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One retained version of a stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVersion {
    pub value: serde_json::Value,
    #[serde(
        rename = "expirationTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredVersion {
    pub fn new(value: serde_json::Value, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { value, expires_at }
    }

    /// A version with no expiration is always valid.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Options for [`CredentialStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Rewrite the on-disk log after updating the cache
    pub persist: bool,
    /// Number of versions to retain, 1..=10
    pub versions_to_store: usize,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            persist: false,
            versions_to_store: 1,
            expires_at: None,
        }
    }
}

impl PutOptions {
    /// Memory-only, single version, no expiration.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Persisted to disk, single version, no expiration.
    pub fn persisted() -> Self {
        Self {
            persist: true,
            ..Self::default()
        }
    }

    pub fn versions(mut self, versions_to_store: usize) -> Self {
        self.versions_to_store = versions_to_store;
        self
    }

    pub fn expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }
}

/// Values of the versions that are still valid, newest first.
pub fn valid_values(versions: &[StoredVersion], now: DateTime<Utc>) -> Vec<serde_json::Value> {
    versions
        .iter()
        .filter(|v| v.is_valid_at(now))
        .map(|v| v.value.clone())
        .collect()
}
