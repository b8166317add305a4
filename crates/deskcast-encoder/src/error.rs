//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur during encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// NVENC not available on this system.
    #[error("NVENC not available: {0}")]
    NvencNotAvailable(String),

    /// Encoder rejected its configuration.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Encoding a frame failed.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Input frame does not match the configured format.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// Encoding is not supported on this platform.
    #[error("Encoding not supported: {0}")]
    NotSupported(String),
}
