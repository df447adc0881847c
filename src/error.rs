//! Error types for the Kraken Futures streaming client.

use thiserror::Error;

/// The main error type for all client operations.
#[derive(Error, Debug)]
pub enum KrakenError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// WebSocket communication error (with message)
    #[error("WebSocket error: {0}")]
    WebSocketMsg(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Missing required credentials
    #[error("Missing credentials: API key and secret required for private feeds")]
    MissingCredentials,

    /// The feed is in neither the public nor the private catalog
    #[error("Unknown feed: {0}")]
    UnknownFeed(String),

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for the closure
        reason: String,
    },

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// Reconnect ceiling reached, the connection manager has stopped
    #[error("Maximum reconnect attempts reached ({attempts})")]
    MaxReconnectExceeded {
        /// The attempt count that hit the ceiling
        attempts: u32,
    },

    /// The connection was cancelled by the application
    #[error("Connection cancelled")]
    Cancelled,
}

impl KrakenError {
    /// Whether this error ends the connection manager for good.
    ///
    /// Everything else raised inside a connection attempt is recovered by
    /// reconnecting.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KrakenError::MaxReconnectExceeded { .. } | KrakenError::Cancelled
        )
    }

    /// Whether this error concerns authorization for private feeds.
    pub fn is_auth(&self) -> bool {
        matches!(self, KrakenError::Auth(_) | KrakenError::MissingCredentials)
    }
}
