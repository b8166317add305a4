//! DXGI desktop-duplication capture backend.
//!
//! Preferred backend: duplicates the output of one monitor via
//! `IDXGIOutputDuplication` and reads frames back through a CPU staging
//! texture. When the compositor has no new frame within the acquire
//! timeout, the previous frame is returned so callers always see the
//! latest desktop contents.

use bytes::Bytes;
use tracing::{debug, instrument, warn};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    IDXGIDevice, IDXGIOutput1, IDXGIOutputDuplication, DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO,
};

use crate::error::CaptureError;
use crate::frame::{PixelFormat, RawFrame};
use crate::{CaptureBackend, CaptureResult, ScreenCapture, ACQUIRE_TIMEOUT_MS};

/// DXGI desktop-duplication capturer for one monitor.
pub struct DxgiCapture {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    staging: ID3D11Texture2D,
    width: u32,
    height: u32,
    last_frame: Option<RawFrame>,
}

impl DxgiCapture {
    /// Duplicate the output at `display_index` (0 = primary).
    #[instrument(name = "dxgi_capture_new")]
    pub fn new(display_index: u32) -> CaptureResult<Self> {
        let mut device = None;
        let mut context = None;

        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )?;
        }

        let device = device.ok_or_else(|| CaptureError::WindowsApi {
            message: "Failed to create D3D11 device".to_string(),
            source: None,
        })?;
        let context = context.ok_or_else(|| CaptureError::WindowsApi {
            message: "Failed to get D3D11 device context".to_string(),
            source: None,
        })?;

        // Device -> adapter -> output -> duplication.
        let dxgi_device: IDXGIDevice = device.cast()?;
        let adapter = unsafe { dxgi_device.GetAdapter()? };
        let output = unsafe {
            adapter
                .EnumOutputs(display_index)
                .map_err(|_| CaptureError::DisplayNotFound(display_index))?
        };
        let output1: IDXGIOutput1 = output.cast()?;
        let duplication = unsafe { output1.DuplicateOutput(&device)? };

        let dup_desc = unsafe { duplication.GetDesc() };
        let width = dup_desc.ModeDesc.Width;
        let height = dup_desc.ModeDesc.Height;

        let staging_desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
        };

        let mut staging = None;
        unsafe {
            device.CreateTexture2D(&staging_desc, None, Some(&mut staging))?;
        }
        let staging = staging.ok_or_else(|| CaptureError::WindowsApi {
            message: "Failed to create staging texture".to_string(),
            source: None,
        })?;

        debug!(width, height, display_index, "DXGI duplication started");

        Ok(Self {
            device,
            context,
            duplication,
            staging,
            width,
            height,
            last_frame: None,
        })
    }

    unsafe fn acquire_into_staging(&mut self) -> CaptureResult<bool> {
        let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource = None;

        match self
            .duplication
            .AcquireNextFrame(ACQUIRE_TIMEOUT_MS, &mut frame_info, &mut resource)
        {
            Ok(()) => {}
            Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(false),
            Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => {
                return Err(CaptureError::DeviceLost);
            }
            Err(e) => return Err(e.into()),
        }

        let resource = resource.ok_or_else(|| CaptureError::WindowsApi {
            message: "Acquired frame resource is None".to_string(),
            source: None,
        })?;

        let texture: ID3D11Texture2D = match resource.cast() {
            Ok(t) => t,
            Err(e) => {
                let _ = self.duplication.ReleaseFrame();
                return Err(e.into());
            }
        };

        self.context.CopyResource(&self.staging, &texture);

        // Release the desktop frame as early as possible.
        let _ = self.duplication.ReleaseFrame();
        Ok(true)
    }

    unsafe fn read_staging(&mut self) -> CaptureResult<RawFrame> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        self.context
            .Map(&self.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))?;

        let stride = mapped.RowPitch as usize;
        let row_bytes = self.width as usize * PixelFormat::Bgra.bytes_per_pixel();
        let src = std::slice::from_raw_parts(mapped.pData as *const u8, stride * self.height as usize);

        // Compact the staging rows: downstream consumers expect a tight
        // width*4 stride.
        let mut data = Vec::with_capacity(row_bytes * self.height as usize);
        for row in 0..self.height as usize {
            let offset = row * stride;
            data.extend_from_slice(&src[offset..offset + row_bytes]);
        }

        self.context.Unmap(&self.staging, 0);

        Ok(RawFrame {
            data: Bytes::from(data),
            width: self.width,
            height: self.height,
            format: PixelFormat::Bgra,
        })
    }
}

impl ScreenCapture for DxgiCapture {
    fn capture_frame(&mut self) -> CaptureResult<RawFrame> {
        let fresh = unsafe { self.acquire_into_staging() }?;

        if fresh {
            let frame = unsafe { self.read_staging() }?;
            self.last_frame = Some(frame.clone());
            return Ok(frame);
        }

        // Static desktop: hand back the previous frame.
        self.last_frame
            .clone()
            .ok_or_else(|| CaptureError::FrameUnavailable("no frame acquired yet".to_string()))
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn backend(&self) -> CaptureBackend {
        CaptureBackend::Dxgi
    }
}

impl Drop for DxgiCapture {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.duplication.ReleaseFrame() } {
            if e.code() != DXGI_ERROR_WAIT_TIMEOUT {
                warn!("ReleaseFrame on drop failed: {}", e);
            }
        }
        debug!("DXGI duplication released");
    }
}

// SAFETY: the duplication interface is only touched from one thread at a
// time; the orchestrator serializes all access behind a mutex.
unsafe impl Send for DxgiCapture {}
