//! Screen capture backends.
//!
//! Pull-model capture: each `capture_frame` call produces the latest
//! desktop contents for one display. Two backends exist on Windows —
//! DXGI desktop duplication (preferred) and GDI BitBlt (fallback) —
//! selected by [`open_capture`] in preference order.

mod display;
#[cfg(windows)]
mod dxgi;
mod error;
mod frame;
#[cfg(windows)]
mod gdi;

pub use display::{enumerate_displays, find_display, DisplayInfo};
#[cfg(windows)]
pub use dxgi::DxgiCapture;
pub use error::CaptureError;
pub use frame::{PixelFormat, RawFrame};
#[cfg(windows)]
pub use gdi::GdiCapture;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// How long a DXGI frame acquire waits for the compositor, in milliseconds.
pub const ACQUIRE_TIMEOUT_MS: u32 = 100;

/// Identifies which backend produced a capturer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    /// DXGI desktop duplication.
    Dxgi,
    /// GDI BitBlt.
    Gdi,
}

impl CaptureBackend {
    /// Display name for status output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Dxgi => "DXGI",
            Self::Gdi => "GDI",
        }
    }
}

/// A capturer bound to one display.
///
/// Implementations release their platform resources on `Drop`.
pub trait ScreenCapture: Send {
    /// Capture the latest frame for the bound display.
    fn capture_frame(&mut self) -> CaptureResult<RawFrame>;

    /// Frame width in pixels.
    fn width(&self) -> u32;

    /// Frame height in pixels.
    fn height(&self) -> u32;

    /// Which backend this capturer uses.
    fn backend(&self) -> CaptureBackend;
}

/// Open a capturer for the display at `display_index`, preferring DXGI
/// and falling back to GDI.
///
/// A failed DXGI init drops its partially created resources before the
/// fallback is attempted. Both backends failing is reported as
/// [`CaptureError::InitFailed`].
#[cfg(windows)]
pub fn open_capture(display_index: u32) -> CaptureResult<Box<dyn ScreenCapture>> {
    match DxgiCapture::new(display_index) {
        Ok(capture) => {
            tracing::info!(display_index, "Using DXGI capture backend");
            Ok(Box::new(capture))
        }
        Err(e) => {
            tracing::warn!(display_index, "DXGI unavailable ({}), trying GDI", e);
            match GdiCapture::new(display_index) {
                Ok(capture) => {
                    tracing::info!(display_index, "Using GDI capture backend");
                    Ok(Box::new(capture))
                }
                Err(e) => Err(CaptureError::InitFailed(format!(
                    "all capture backends failed: {e}"
                ))),
            }
        }
    }
}

/// Open a capturer (non-Windows stub).
#[cfg(not(windows))]
pub fn open_capture(_display_index: u32) -> CaptureResult<Box<dyn ScreenCapture>> {
    Err(CaptureError::NotSupported)
}
