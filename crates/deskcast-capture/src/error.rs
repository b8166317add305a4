//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// Requested display does not exist.
    #[error("Display not found: index {0}")]
    DisplayNotFound(u32),

    /// Every capture backend failed to initialize.
    #[error("Capture initialization failed: {0}")]
    InitFailed(String),

    /// No frame could be produced this cycle.
    #[error("No frame available: {0}")]
    FrameUnavailable(String),

    /// Capture device lost (display mode change, session switch).
    #[error("Capture device lost")]
    DeviceLost,

    /// Screen capture is not supported on this platform.
    #[error("Screen capture not supported on this platform")]
    NotSupported,
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}
