//! Error types for panel-bridge.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A request was issued before the surface completed its handshake.
    #[error("Surface not ready: await initialize() before sending requests")]
    NotReady,

    /// No response arrived within the configured message timeout.
    #[error("Request timed out: {message_type}")]
    RequestTimeout {
        /// Type of the request that timed out.
        message_type: String,
    },

    /// Dispatch found no handler for the given message type.
    #[error("No handler registered for message type: {0}")]
    UnhandledMessageType(String),

    /// A registered handler failed. Displays the handler's own message text.
    #[error("{0}")]
    HandlerFailure(String),

    /// The surface was re-initialized while the request was pending.
    #[error("Handshake reset: surface re-initialized")]
    HandshakeReset,

    /// Empty or reserved message type used where a domain type is required.
    #[error("Invalid message type: {0:?}")]
    InvalidMessageType(String),

    /// The transport only accepts a single subscriber.
    #[error("Transport already has a subscriber")]
    AlreadySubscribed,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound queue is full.
    #[error("Outbound channel full")]
    ChannelFull,

    /// I/O error on a stream transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Wrap any displayable handler error, keeping only its message text.
    pub fn handler<E: std::fmt::Display>(err: E) -> Self {
        BridgeError::HandlerFailure(err.to_string())
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
