//! Error types for the custody bridge
//!
//! Subsystems keep their own error enums; everything that reaches an HTTP
//! response or `main` is folded into [`BridgeError`].

use hyper::StatusCode;

use crate::backend::BackendError;
use crate::export::ExportError;
use crate::handshake::HandshakeError;
use crate::store::StoreError;

/// Main error type for bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Missing required secret or credential at startup (fatal)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed request input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend capability or custody counterpart failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured JSON body for error responses
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        })
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for BridgeError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingSecret => Self::Configuration(err.to_string()),
            StoreError::NotFound(key) => Self::NotFound(key),
            StoreError::InvalidVersions(_) => Self::Validation(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<BackendError> for BridgeError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound { .. } => Self::NotFound(err.to_string()),
            BackendError::InvalidName(_) => Self::Validation(err.to_string()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<HandshakeError> for BridgeError {
    fn from(err: HandshakeError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<ExportError> for BridgeError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::InvalidPublicKey(_) | ExportError::InvalidRequest(_) => {
                Self::Validation(err.to_string())
            }
            ExportError::Backend(inner) => inner.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            BridgeError::Validation("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            BridgeError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            BridgeError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: BridgeError = StoreError::NotFound("session".into()).into();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[test]
    fn test_backend_not_found_maps_to_not_found() {
        let err: BridgeError = BackendError::NotFound {
            folder: "vault".into(),
            name: "1".into(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
