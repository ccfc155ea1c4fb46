//! Error types for k17link
//!
//! Provides a unified error type for all engine operations.

use thiserror::Error;

/// Result type alias using K17Error
pub type Result<T> = std::result::Result<T, K17Error>;

/// Unified error type for k17link operations
#[derive(Debug, Error)]
pub enum K17Error {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Framing Errors (recovered locally by the reader)
    // -------------------------------------------------------------------------
    #[error("Malformed hex encoding: {0}")]
    MalformedEncoding(String),

    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Request 0x{command:02x} timed out")]
    Timeout { command: u8 },

    #[error("Another request is already outstanding")]
    Busy,

    #[error("Invalid volume {0} (expected 0-100)")]
    InvalidVolume(u16),

    #[error("Invalid settings payload: {0}")]
    InvalidSettings(String),

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<hex::FromHexError> for K17Error {
    fn from(err: hex::FromHexError) -> Self {
        K17Error::MalformedEncoding(err.to_string())
    }
}

impl From<serde_json::Error> for K17Error {
    fn from(err: serde_json::Error) -> Self {
        K17Error::InvalidSettings(err.to_string())
    }
}

impl K17Error {
    /// True for errors that mean the connection itself is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            K17Error::Io(_) | K17Error::ConnectionLost | K17Error::NotConnected
        )
    }
}
