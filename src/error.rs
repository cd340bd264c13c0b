//! Error types for streamplex.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for all streaming operations.
#[derive(Debug, Error)]
pub enum StreamingError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (control payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Header failed validation. Fatal to the connection.
    #[error("{0}")]
    MalformedHeader(&'static str),

    /// Protocol error (bad control payload, length mismatch, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A response is already pending for this request id.
    #[error("Request id {0} already exists in the request manager")]
    DuplicateRequest(Uuid),

    /// Content stream was cancelled before it was fully received.
    #[error("Content stream {0} was cancelled")]
    StreamCancelled(Uuid),

    /// Connection closed by the remote side.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection dropped while work was outstanding.
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// Operation needs a connected transport.
    #[error("Not connected")]
    NotConnected,

    /// Transport is already attached.
    #[error("Already connected")]
    AlreadyConnected,

    /// No response arrived within the configured request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Reconnect gave up.
    #[error("Reconnect failed after {attempts} attempts")]
    ReconnectFailed {
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Result type alias using StreamingError.
pub type Result<T> = std::result::Result<T, StreamingError>;
