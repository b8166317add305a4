//! NVENC hardware video encoder.

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::error::EncoderError;
use crate::{EncoderConfig, EncoderResult, VideoEncoder};

// Conditional compilation for NVENC support
#[cfg(all(windows, feature = "nvenc"))]
mod nvenc_impl {
    use super::*;
    use nvidia_video_codec_sdk::safe::api::ENCODE_API;
    use std::sync::OnceLock;

    static NVENC_AVAILABLE: OnceLock<bool> = OnceLock::new();

    /// Check if NVENC is available on this system.
    pub fn check_nvenc_available() -> bool {
        *NVENC_AVAILABLE.get_or_init(|| match ENCODE_API.lock() {
            Ok(_) => {
                tracing::info!("NVENC API available");
                true
            }
            Err(e) => {
                debug!("NVENC not available: {:?}", e);
                false
            }
        })
    }
}

#[cfg(not(all(windows, feature = "nvenc")))]
mod nvenc_impl {
    use super::*;

    /// NVENC is not available without Windows and the nvenc feature.
    pub fn check_nvenc_available() -> bool {
        debug!("NVENC support not compiled in (requires Windows + nvenc feature)");
        false
    }
}

/// NVENC hardware encoder wrapper.
///
/// Probes for NVENC support at construction; construction fails on
/// machines without a capable GPU so the factory can fall back to x264.
pub struct NvencEncoder {
    config: EncoderConfig,
    frame_count: u64,
    keyframe_interval: u64,
    // With the full NVENC session wired up:
    // session: Option<Session>,
    // buffers: Vec<Buffer>,
}

impl NvencEncoder {
    /// Create a new NVENC encoder.
    #[instrument(name = "nvenc_new", skip_all)]
    pub fn new(config: EncoderConfig) -> EncoderResult<Self> {
        if !Self::check_nvenc_available() {
            return Err(EncoderError::NvencNotAvailable(
                "No NVIDIA GPU with NVENC support detected".to_string(),
            ));
        }

        let keyframe_interval = (config.fps * config.keyframe_interval_secs.max(1)) as u64;

        debug!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate_kbps = config.bitrate_kbps,
            "Initializing NVENC encoder"
        );

        // A full implementation creates a CUDA context, opens an encode
        // session, and allocates input buffers and output bitstreams here.

        Ok(Self {
            config,
            frame_count: 0,
            keyframe_interval,
        })
    }

    /// Check if NVENC is available on this system.
    pub fn check_nvenc_available() -> bool {
        nvenc_impl::check_nvenc_available()
    }

    /// Check if NVENC support is compiled into this build.
    pub fn is_compiled_with_nvenc() -> bool {
        cfg!(all(windows, feature = "nvenc"))
    }
}

impl VideoEncoder for NvencEncoder {
    #[instrument(name = "nvenc_encode", skip(self, data))]
    fn encode(&mut self, data: &[u8], width: u32, height: u32) -> EncoderResult<Bytes> {
        let expected = (self.config.width * self.config.height * 4) as usize;
        if width != self.config.width || height != self.config.height || data.len() != expected {
            return Err(EncoderError::InvalidInput(format!(
                "expected {} bytes ({}x{} BGRA), got {}",
                expected, self.config.width, self.config.height,
                data.len()
            )));
        }

        let _force_idr = self.frame_count % self.keyframe_interval == 0;
        self.frame_count += 1;

        // A full implementation uploads the frame to the GPU input
        // buffer, submits the encode, and drains the bitstream here.
        Err(EncoderError::Encoding(
            "NVENC encode session not wired up".to_string(),
        ))
    }

    fn sequence_params(&self) -> Bytes {
        Bytes::new()
    }

    fn is_hardware_accelerated(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "h264_nvenc"
    }
}
