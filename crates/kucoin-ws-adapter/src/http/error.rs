/*
[INPUT]:  Error sources (HTTP, API, serialization, bootstrap, WebSocket, subscription protocol)
[OUTPUT]: Structured error types with context and retry hints
[POS]:    Error handling layer - unified error types for entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the KuCoin stream adapter
#[derive(Error, Debug)]
pub enum KucoinError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error (code {code}): {message}")]
    Api { code: i32, message: String },

    /// Bootstrap call returned no token
    #[error("Invalid public token from KuCoin")]
    InvalidToken,

    /// Bootstrap call returned no instance server to connect to
    #[error("No instance server in bootstrap response")]
    NoInstanceServer,

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Outbound frame could not be written
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Handshake or send timeout
    #[error("Timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// Welcome handshake did not arrive in time
    #[error("No welcome message from KuCoin received")]
    NoWelcome,

    /// Canonical candle interval outside the supported table
    #[error("Wrong candle interval {interval:?}, expected one of: {expected}")]
    UnsupportedInterval { interval: String, expected: String },

    /// Venue interval string that has no canonical counterpart
    #[error("Unable to map KuCoin candle interval: {0}")]
    UnknownVenueInterval(String),

    /// Operation requires an open connection
    #[error("Please call connect before subscribing")]
    NotConnected,

    /// Caller tried to close a connection that still carries subscriptions
    #[error("You have activated subscriptions! ({0})")]
    ActiveSubscriptions(usize),
}

impl KucoinError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KucoinError::Http(_)
                | KucoinError::Timeout { .. }
                | KucoinError::WebSocket(_)
                | KucoinError::SendFailed(_)
                | KucoinError::InvalidResponse(_)
        )
    }

    /// Get retry delay in seconds (if retryable)
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            KucoinError::Timeout { .. } => Some(1),
            KucoinError::SendFailed(_) => Some(2),
            _ => None,
        }
    }

    /// Whether the failure must be surfaced to the caller rather than retried
    /// internally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KucoinError::InvalidToken
                | KucoinError::NoInstanceServer
                | KucoinError::NoWelcome
                | KucoinError::UnsupportedInterval { .. }
                | KucoinError::UnknownVenueInterval(_)
                | KucoinError::NotConnected
                | KucoinError::ActiveSubscriptions(_)
        )
    }

    /// Create an API error from status code and message
    pub fn api_error(status: StatusCode, message: impl Into<String>) -> Self {
        KucoinError::Api {
            code: status.as_u16() as i32,
            message: message.into(),
        }
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, KucoinError>;
