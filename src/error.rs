//! Error types for the call relay and agent

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session pairing and registry errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Identity is not in the allow-list. Terminal for the connection.
    #[error("Identity not authorized: {0}")]
    Unauthorized(String),

    #[error("Identity must be non-empty")]
    EmptyIdentity,

    #[error("No session for identity: {0}")]
    NotFound(String),
}

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unparseable envelope. Skipped, never terminal.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message missing a type tag")]
    MissingType,

    /// Recognized JSON but an unknown type tag. Ignored for forward
    /// compatibility.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid audio payload: {0}")]
    InvalidPayload(String),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Bounded queue evicted its oldest frame. Recovered locally.
    #[error("Queue overflow, oldest frame dropped")]
    QueueOverflow,

    #[error("Playback sink write failed: {0}")]
    SinkWriteFailed(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Socket closed or errored. Terminal for that connection only.
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// The forward target has no bound endpoint. Silently dropped.
    #[error("Peer endpoint not connected")]
    PeerUnavailable,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
