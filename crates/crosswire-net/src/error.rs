//! Error types for the transfer module.

use std::fmt;

/// Errors that fail a transfer before or outside the callback protocol.
///
/// Failures *during* a transfer travel through the state machine as an
/// `Error` status with a message string; this type covers the initiating
/// call's own failure modes (the transport refusing to start, local I/O).
#[derive(Debug, Clone)]
pub enum TransferError {
    /// The transport could not start the request.
    Request(String),
    /// A local I/O failure (spawning the transfer thread, output files).
    Io(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "Transfer request error: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

/// A specialized Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
