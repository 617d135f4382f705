//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering the failure modes of the console client.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Addressing errors
    /// The configured API base URL could not be turned into a channel address.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    // Handshake errors
    /// The channel handshake could not be sent or was rejected.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No bearer credential could be obtained from the session provider.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    // Connection errors
    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    // REST API errors
    /// The lifecycle API answered with an unexpected status.
    #[error("api request failed with status {status}: {message}")]
    Http {
        /// HTTP status code returned by the API.
        status: u16,
        /// Response body or transport error message.
        message: String,
    },

    /// The requested server does not exist (or is no longer visible).
    #[error("server not found: {server_id}")]
    NotFound {
        /// The missing server identifier.
        server_id: String,
    },

    /// Local I/O failed.
    #[error("io error: {0}")]
    Io(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<url::ParseError> for ProtocolError {
    fn from(err: url::ParseError) -> Self {
        ProtocolError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::Io(err.to_string()),
        }
    }
}
