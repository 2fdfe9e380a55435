//! Error types for Outstream Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for placement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Placement error types
#[derive(Error, Debug)]
pub enum Error {
    // Initialization errors
    #[error("Failed to load ad SDK: {0}")]
    SdkLoad(String),

    #[error("Failed to create playback engine: {0}")]
    EngineCreate(String),

    #[error("Failed to attach ad plugin: {0}")]
    AdBridgeAttach(String),

    // Ad serving errors
    #[error("Ad serving error: {0}")]
    AdServing(String),

    // Configuration errors
    #[error("Invalid ad tag: {0}")]
    InvalidAdTag(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Lifecycle errors
    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this error ends the session before any ad can show
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SdkLoad(_) | Error::EngineCreate(_) | Error::AdBridgeAttach(_)
        )
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::SdkLoad(_) => "SDK_LOAD",
            Error::EngineCreate(_) => "ENGINE_CREATE",
            Error::AdBridgeAttach(_) => "ADBRIDGE_ATTACH",
            Error::AdServing(_) => "AD_SERVING",
            Error::InvalidAdTag(_) => "INVALID_AD_TAG",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::Internal(_) => "INTERNAL",
            Error::Json(_) => "JSON",
        }
    }

    /// Snapshot of this error suitable for session state
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.error_code().to_string(),
            message: self.to_string(),
            fatal: self.is_fatal(),
        }
    }
}

/// Serializable error record kept in session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Whether the error happened before the ads-manager existed
    pub fatal: bool,
}

impl ErrorInfo {
    /// Ad-level error reported by the SDK after manager creation
    pub fn ad_serving(message: Option<&str>) -> Self {
        Error::AdServing(message.unwrap_or("unknown ad error").to_string()).info()
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
