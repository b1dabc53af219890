//! Error types for meshlink operations
//!
//! Synchronous failures (connect, send, send_to) are returned to the caller.
//! Asynchronous ones (malformed inbound frames, failed discovery cycles,
//! relay send errors) are logged and counted but never raised.

use thiserror::Error;

/// Main error type for the mesh messaging layer
#[derive(Error, Debug)]
pub enum MeshError {
    // ===== Connection Errors =====
    /// The transport could not be opened
    #[error("Failed to open transport {transport}: {reason}")]
    ConnectionError {
        /// Transport name
        transport: String,
        /// Failure reason
        reason: String,
    },

    /// `connect` was called while a session is active
    #[error("Communicator is already connected")]
    AlreadyConnected,

    /// An operation needing the transport was called before `connect`
    #[error("Communicator is not connected")]
    NotConnected,

    // ===== Send Errors =====
    /// Message exceeds the configured maximum total length
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge {
        /// Actual message size in bytes
        size: usize,
        /// Maximum allowed size in bytes
        max: usize,
    },

    /// Unicast target is not in the current peer set
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// A single transport send failed
    #[error("Transport send failed: {0}")]
    TransportSend(String),

    /// Some frames of a message could not be handed to the transport
    #[error("{failed} of {attempted} frames failed for message {message_id}")]
    SendFailed {
        /// Message identifier
        message_id: String,
        /// Frames that failed
        failed: usize,
        /// Frames attempted
        attempted: usize,
    },

    // ===== Protocol Errors =====
    /// Inbound frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Message identifier is not 3-5 ASCII alphanumerics
    #[error("Invalid message id: {0:?}")]
    InvalidMessageId(String),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// Internal channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshError {
    /// Check if this error is recoverable by trying again later
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            MeshError::ConnectionError { .. }
                | MeshError::TransportSend(_)
                | MeshError::SendFailed { .. }
                | MeshError::PeerNotFound(_)
        )
    }

    /// Check if this is a protocol error (bad data from the air)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            MeshError::MalformedFrame(_) | MeshError::InvalidMessageId(_)
        )
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            MeshError::ConnectionError { .. } => "CONNECTION_ERROR",
            MeshError::AlreadyConnected => "ALREADY_CONNECTED",
            MeshError::NotConnected => "NOT_CONNECTED",
            MeshError::MessageTooLarge { .. } => "MESSAGE_TOO_LARGE",
            MeshError::PeerNotFound(_) => "PEER_NOT_FOUND",
            MeshError::TransportSend(_) => "TRANSPORT_SEND",
            MeshError::SendFailed { .. } => "SEND_FAILED",
            MeshError::MalformedFrame(_) => "MALFORMED_FRAME",
            MeshError::InvalidMessageId(_) => "INVALID_MESSAGE_ID",
            MeshError::InvalidConfig(_) => "INVALID_CONFIG",
            MeshError::ChannelClosed => "CHANNEL_CLOSED",
            MeshError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for meshlink operations
pub type Result<T> = std::result::Result<T, MeshError>;

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::MalformedFrame(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MeshError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MeshError::ChannelClosed
    }
}
