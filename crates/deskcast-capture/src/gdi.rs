//! GDI BitBlt capture backend.
//!
//! Fallback backend for systems where desktop duplication is unavailable.
//! Copies the monitor's region of the virtual screen into a compatible
//! bitmap and reads it back as top-down BGRA.

use bytes::Bytes;
use tracing::{debug, instrument};
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, CAPTUREBLT, DIB_RGB_COLORS,
    HBITMAP, HDC, ROP_CODE, SRCCOPY,
};

use crate::display::{find_display, DisplayInfo};
use crate::error::CaptureError;
use crate::frame::{PixelFormat, RawFrame};
use crate::{CaptureBackend, CaptureResult, ScreenCapture};

/// GDI screen capturer for one monitor.
pub struct GdiCapture {
    screen_dc: HDC,
    mem_dc: HDC,
    bitmap: HBITMAP,
    origin: (i32, i32),
    width: u32,
    height: u32,
}

impl GdiCapture {
    /// Open a GDI capturer for the display at `display_index`.
    #[instrument(name = "gdi_capture_new")]
    pub fn new(display_index: u32) -> CaptureResult<Self> {
        let display = find_display(display_index)?;
        Self::for_display(&display)
    }

    fn for_display(display: &DisplayInfo) -> CaptureResult<Self> {
        let width = display.width();
        let height = display.height();

        unsafe {
            let screen_dc = GetDC(HWND::default());
            if screen_dc.is_invalid() {
                return Err(CaptureError::InitFailed("GetDC failed".to_string()));
            }

            let mem_dc = CreateCompatibleDC(screen_dc);
            if mem_dc.is_invalid() {
                ReleaseDC(HWND::default(), screen_dc);
                return Err(CaptureError::InitFailed(
                    "CreateCompatibleDC failed".to_string(),
                ));
            }

            let bitmap = CreateCompatibleBitmap(screen_dc, width as i32, height as i32);
            if bitmap.is_invalid() {
                let _ = DeleteDC(mem_dc);
                ReleaseDC(HWND::default(), screen_dc);
                return Err(CaptureError::InitFailed(
                    "CreateCompatibleBitmap failed".to_string(),
                ));
            }

            SelectObject(mem_dc, bitmap);

            debug!(width, height, name = %display.name, "GDI capture started");

            Ok(Self {
                screen_dc,
                mem_dc,
                bitmap,
                origin: (display.bounds.0, display.bounds.1),
                width,
                height,
            })
        }
    }
}

impl ScreenCapture for GdiCapture {
    fn capture_frame(&mut self) -> CaptureResult<RawFrame> {
        let size = RawFrame::buffer_size(self.width, self.height, PixelFormat::Bgra);
        let mut data = vec![0u8; size];

        unsafe {
            BitBlt(
                self.mem_dc,
                0,
                0,
                self.width as i32,
                self.height as i32,
                self.screen_dc,
                self.origin.0,
                self.origin.1,
                ROP_CODE(SRCCOPY.0 | CAPTUREBLT.0),
            )
            .map_err(|e| CaptureError::FrameUnavailable(format!("BitBlt failed: {e}")))?;

            // Negative height requests a top-down DIB.
            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: self.width as i32,
                    biHeight: -(self.height as i32),
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };

            let copied = GetDIBits(
                self.mem_dc,
                self.bitmap,
                0,
                self.height,
                Some(data.as_mut_ptr() as *mut _),
                &mut info,
                DIB_RGB_COLORS,
            );
            if copied == 0 {
                return Err(CaptureError::FrameUnavailable(
                    "GetDIBits returned no scan lines".to_string(),
                ));
            }
        }

        Ok(RawFrame {
            data: Bytes::from(data),
            width: self.width,
            height: self.height,
            format: PixelFormat::Bgra,
        })
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn backend(&self) -> CaptureBackend {
        CaptureBackend::Gdi
    }
}

impl Drop for GdiCapture {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteObject(self.bitmap);
            let _ = DeleteDC(self.mem_dc);
            ReleaseDC(HWND::default(), self.screen_dc);
        }
        debug!("GDI capture released");
    }
}

// SAFETY: GDI handles are only used from one thread at a time; the
// orchestrator serializes all access behind a mutex.
unsafe impl Send for GdiCapture {}
