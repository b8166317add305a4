//! H.264 video encoding.
//!
//! One software encoder (x264) and an availability-gated NVENC shim,
//! behind a common [`VideoEncoder`] trait. Encoders consume BGRA frames
//! and emit Annex-B elementary stream bytes; the out-of-band SPS/PPS
//! blob is captured at init and exposed via `sequence_params`.

mod convert;
mod error;
#[cfg(windows)]
mod nvenc;
#[cfg(windows)]
mod x264;

pub use convert::{bgra_to_nv12, nv12_buffer_size};
pub use error::EncoderError;
#[cfg(windows)]
pub use nvenc::NvencEncoder;
#[cfg(windows)]
pub use x264::X264Encoder;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use deskcast_capture::PixelFormat;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Selects which encoder backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    /// x264 software encoder.
    X264,
    /// NVIDIA hardware encoder.
    Nvenc,
}

impl VideoCodec {
    /// Parse a codec selector string ("x264", "h264_nvenc").
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x264" => Some(Self::X264),
            "h264_nvenc" => Some(Self::Nvenc),
            _ => None,
        }
    }

    /// Canonical selector name.
    pub fn name(self) -> &'static str {
        match self {
            Self::X264 => "x264",
            Self::Nvenc => "h264_nvenc",
        }
    }
}

impl Default for VideoCodec {
    fn default() -> Self {
        Self::X264
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// H.264 profile levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

/// Video encoding configuration.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Target frames per second.
    pub fps: u32,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Keyframe interval in seconds (gop = fps * interval).
    pub keyframe_interval_secs: u32,

    /// Input pixel layout.
    pub pixel_format: PixelFormat,

    /// H.264 profile.
    pub profile: H264Profile,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 25,
            bitrate_kbps: 8000,
            keyframe_interval_secs: 1,
            pixel_format: PixelFormat::Bgra,
            profile: H264Profile::High,
        }
    }
}

/// Trait for video encoders.
pub trait VideoEncoder: Send {
    /// Encode one raw frame.
    ///
    /// Returns the encoded Annex-B bytes, or an empty buffer when the
    /// frame is held inside the encoder's lookahead (a valid outcome,
    /// not an error).
    fn encode(&mut self, data: &[u8], width: u32, height: u32) -> EncoderResult<Bytes>;

    /// Out-of-band Annex-B SPS/PPS blob captured at init.
    fn sequence_params(&self) -> Bytes;

    /// Whether this encoder is hardware accelerated.
    fn is_hardware_accelerated(&self) -> bool;

    /// Encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Create a video encoder for the requested codec.
///
/// An unavailable hardware codec falls back to x264 with a warning;
/// an x264 failure is terminal.
#[cfg(windows)]
pub fn create_video_encoder(
    config: EncoderConfig,
    codec: VideoCodec,
) -> EncoderResult<Box<dyn VideoEncoder>> {
    match codec {
        VideoCodec::Nvenc => match NvencEncoder::new(config.clone()) {
            Ok(encoder) => {
                tracing::info!("Using NVENC hardware encoder");
                Ok(Box::new(encoder))
            }
            Err(e) => {
                tracing::warn!("NVENC not available: {}, falling back to x264", e);
                Ok(Box::new(X264Encoder::new(config)?))
            }
        },
        VideoCodec::X264 => {
            let encoder = X264Encoder::new(config)?;
            tracing::info!("Using x264 software encoder");
            Ok(Box::new(encoder))
        }
    }
}

/// Create a video encoder (stub for non-Windows platforms).
#[cfg(not(windows))]
pub fn create_video_encoder(
    _config: EncoderConfig,
    _codec: VideoCodec,
) -> EncoderResult<Box<dyn VideoEncoder>> {
    Err(EncoderError::NotSupported(
        "video encoding is only supported on Windows".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_selector_names() {
        assert_eq!(VideoCodec::from_name("x264"), Some(VideoCodec::X264));
        assert_eq!(VideoCodec::from_name("h264_nvenc"), Some(VideoCodec::Nvenc));
        assert_eq!(VideoCodec::from_name("h264_qsv"), None);
        assert_eq!(VideoCodec::X264.name(), "x264");
    }

    #[test]
    fn default_config_matches_capture_format() {
        let config = EncoderConfig::default();
        assert_eq!(config.pixel_format, PixelFormat::Bgra);
        assert_eq!(config.fps, 25);
    }
}
