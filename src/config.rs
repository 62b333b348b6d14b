//! Configuration for the custody bridge
//!
//! CLI arguments and environment variable handling using clap. A `.env`
//! file, if present, is loaded before parsing.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::handshake::HandshakeSchedule;

/// Custody bridge - encrypted secret export and session handshake
#[derive(Parser, Debug, Clone)]
#[command(name = "custody-bridge")]
#[command(about = "Encrypted secret export and session handshake for custody counterparts")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Base URL of the custody counterpart
    #[arg(long, env = "CUSTODY_URL", default_value = "http://localhost:4000")]
    pub custody_url: String,

    /// Public URL of this bridge, sent during the handshake and in health reports
    #[arg(long, env = "URL", default_value = "http://localhost:3000")]
    pub url: String,

    /// Verify-key fallback used until a handshake stores one
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// Secret protecting the on-disk credential store (required)
    #[arg(long, env = "SECURE_STORE_SECRET", hide_env_values = true)]
    pub secure_store_secret: Option<String>,

    /// Encrypted credential store file
    #[arg(long, env = "SECURE_STORE_PATH", default_value = "secure-store.dat")]
    pub secure_store_path: PathBuf,

    /// Directory holding the handshake key pair
    #[arg(long, env = "KEY_DIR", default_value = "tmp/app/keys")]
    pub key_dir: PathBuf,

    /// Storage backend: local | memory
    #[arg(long, env = "HANDLER", default_value = "local")]
    pub handler: String,

    /// Root directory for the local backend
    #[arg(long, env = "STORAGE_ROOT", default_value = "vaults")]
    pub storage_root: PathBuf,

    /// Maximum concurrent backend fetches per export
    #[arg(long, env = "EXPORT_CONCURRENCY", default_value = "10")]
    pub export_concurrency: usize,

    /// Page size when listing a whole vault
    #[arg(long, env = "LIST_PAGE_SIZE", default_value = "100")]
    pub list_page_size: usize,

    /// Delay before retrying a failed handshake
    #[arg(long, env = "HANDSHAKE_RETRY_SECS", default_value = "20")]
    pub handshake_retry_secs: u64,

    /// Session rotation period
    #[arg(long, env = "HANDSHAKE_INTERVAL_SECS", default_value = "2700")]
    pub handshake_interval_secs: u64,

    /// Storage probe period
    #[arg(long, env = "HEALTH_CHECK_INTERVAL_SECS", default_value = "30")]
    pub health_check_interval_secs: u64,

    /// Timeout for requests to the custody counterpart
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store_secret().is_none() {
            return Err("SECURE_STORE_SECRET is required".to_string());
        }

        if self.export_concurrency == 0 {
            return Err("EXPORT_CONCURRENCY must be at least 1".to_string());
        }

        if self.list_page_size == 0 {
            return Err("LIST_PAGE_SIZE must be at least 1".to_string());
        }

        if !matches!(self.handler.as_str(), "local" | "memory") {
            return Err(format!("Invalid HANDLER '{}' (expected local or memory)", self.handler));
        }

        Ok(())
    }

    /// Store secret, if set and non-empty
    pub fn store_secret(&self) -> Option<&str> {
        self.secure_store_secret
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    pub fn handshake_schedule(&self) -> HandshakeSchedule {
        HandshakeSchedule {
            retry_delay: Duration::from_secs(self.handshake_retry_secs),
            rotation_interval: Duration::from_secs(self.handshake_interval_secs),
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
