//! Custody bridge - encrypted secret export and session handshake
//!
//! Sits between a secret storage backend and a custody counterpart that
//! orchestrates key custody.
//!
//! ## Services
//!
//! - **Store**: encrypted, versioned credential store for session material
//! - **Handshake**: RSA challenge/response that establishes and rotates sessions
//! - **Export**: streaming hybrid-encrypted (RSA-OAEP + AES-256-CBC) vault export
//! - **Health**: storage probe reported to the counterpart
//! - **Keys**: session-protected get-key / set-key endpoints

pub mod backend;
pub mod config;
pub mod crypto;
pub mod custody;
pub mod export;
pub mod handshake;
pub mod health;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{BridgeError, Result};
