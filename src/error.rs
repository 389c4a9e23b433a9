//! # Error Types
//!
//! Custom error types for the telemetry gatherer using `thiserror`.

use thiserror::Error;

/// Main error type for the telemetry gatherer
#[derive(Debug, Error)]
pub enum GathererError {
    /// A blocking read returned nothing within its timeout
    #[error("read timed out after {0} ms")]
    Timeout(u64),

    /// Too many checksum or resynchronization failures
    #[error("number of transfer errors ({errors}) exceeds the acceptable limit of {limit}")]
    TransferErrorLimit {
        /// Errors counted so far
        errors: u32,
        /// Configured limit
        limit: u32,
    },

    /// Frame payload could not be decoded at all
    #[error("decode error: {0}")]
    Decode(String),

    /// Serial port errors
    #[error("serial port error: {0}")]
    Serial(String),

    /// None of the candidate serial ports could be opened
    #[error("no serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// The byte stream ended
    #[error("connection closed by device")]
    ConnectionClosed,

    /// Series sink rejected an operation
    #[error("series sink error: {0}")]
    Sink(String),

    /// Acquisition worker panicked or was aborted
    #[error("acquisition worker failed: {0}")]
    Worker(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GathererError {
    /// Whether this error is a read timeout (recoverable)
    pub fn is_timeout(&self) -> bool {
        matches!(self, GathererError::Timeout(_))
    }
}

/// Result type alias for the telemetry gatherer
pub type Result<T> = std::result::Result<T, GathererError>;
