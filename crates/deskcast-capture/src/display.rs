//! Display enumeration.

#[cfg(windows)]
use tracing::{debug, instrument};
#[cfg(windows)]
use windows::Win32::Foundation::{BOOL, LPARAM, RECT};
#[cfg(windows)]
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFOEXW,
};

#[cfg(windows)]
use crate::error::CaptureError;
use crate::CaptureResult;

/// A display available for capture.
#[derive(Debug, Clone)]
pub struct DisplayInfo {
    /// Native monitor handle.
    pub handle: isize,

    /// Device path of the display.
    pub name: String,

    /// Display bounds in virtual-screen coordinates.
    pub bounds: (i32, i32, i32, i32), // left, top, right, bottom

    /// Whether this is the primary display.
    pub is_primary: bool,
}

impl DisplayInfo {
    /// Width of the display in pixels.
    pub fn width(&self) -> u32 {
        (self.bounds.2 - self.bounds.0) as u32
    }

    /// Height of the display in pixels.
    pub fn height(&self) -> u32 {
        (self.bounds.3 - self.bounds.1) as u32
    }
}

/// Enumerate all displays attached to the desktop.
#[cfg(windows)]
#[instrument(name = "enumerate_displays")]
pub fn enumerate_displays() -> CaptureResult<Vec<DisplayInfo>> {
    let mut displays: Vec<DisplayInfo> = Vec::new();

    unsafe {
        EnumDisplayMonitors(
            HDC::default(),
            None,
            Some(enum_display_callback),
            LPARAM(&mut displays as *mut Vec<DisplayInfo> as isize),
        )
        .ok()
        .map_err(|_| CaptureError::WindowsApi {
            message: "Failed to enumerate displays".to_string(),
            source: None,
        })?;
    }

    debug!(count = displays.len(), "Enumerated displays");
    Ok(displays)
}

/// Enumerate all displays (non-Windows stub: nothing to capture).
#[cfg(not(windows))]
pub fn enumerate_displays() -> CaptureResult<Vec<DisplayInfo>> {
    Ok(Vec::new())
}

#[cfg(windows)]
unsafe extern "system" fn enum_display_callback(
    hmonitor: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    let displays = &mut *(lparam.0 as *mut Vec<DisplayInfo>);

    let mut monitor_info = MONITORINFOEXW::default();
    monitor_info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;

    if GetMonitorInfoW(hmonitor, &mut monitor_info.monitorInfo).as_bool() {
        let name = String::from_utf16_lossy(
            &monitor_info.szDevice[..monitor_info
                .szDevice
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(monitor_info.szDevice.len())],
        );

        displays.push(DisplayInfo {
            handle: hmonitor.0 as isize,
            name,
            bounds: (
                monitor_info.monitorInfo.rcMonitor.left,
                monitor_info.monitorInfo.rcMonitor.top,
                monitor_info.monitorInfo.rcMonitor.right,
                monitor_info.monitorInfo.rcMonitor.bottom,
            ),
            is_primary: (monitor_info.monitorInfo.dwFlags & 1) != 0, // MONITORINFOF_PRIMARY
        });
    }

    BOOL::from(true)
}

/// Look up a display by its enumeration index.
pub fn find_display(index: u32) -> CaptureResult<DisplayInfo> {
    let displays = enumerate_displays()?;
    displays
        .into_iter()
        .nth(index as usize)
        .ok_or(crate::CaptureError::DisplayNotFound(index))
}
