//! Autosync Error Types

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for Autosync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Autosync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Placement errors
    #[error("Local cluster {my_cluster} is not part of the placement [{placement}]")]
    NotInPlacement { my_cluster: String, placement: String },

    #[error("Unsupported number of peer clusters: {0} (exactly one is supported)")]
    UnsupportedPeerCount(usize),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Request timeout waiting for {0}")]
    RequestTimeout(String),

    // Local pipeline errors
    #[error("Local upstream error: {0}")]
    Upstream(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    ///
    /// Nothing in the replication path retries; callers above the gateway may.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::RequestTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
        )
    }

    /// Check if this error comes from a misconfigured placement
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::NotInPlacement { .. }
                | Error::UnsupportedPeerCount(_)
        )
    }

    /// HTTP status used when this error ends a request
    pub fn status_code(&self) -> StatusCode {
        if self.is_misconfiguration() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else if self.is_retryable() || matches!(self, Error::Upstream(_)) {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
