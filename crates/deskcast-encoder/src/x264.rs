//! x264 software video encoder.

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::convert::bgra_to_nv12;
use crate::error::EncoderError;
use crate::{EncoderConfig, EncoderResult, H264Profile, VideoEncoder};

/// x264 software encoder wrapper.
pub struct X264Encoder {
    encoder: x264::Encoder,
    config: EncoderConfig,
    frame_count: u64,
    /// Scratch NV12 buffer, reused across frames.
    nv12: Vec<u8>,
    /// Cached SPS/PPS header blob.
    headers: Bytes,
}

impl X264Encoder {
    /// Create a new x264 encoder.
    #[instrument(name = "x264_new", skip_all)]
    pub fn new(config: EncoderConfig) -> EncoderResult<Self> {
        debug!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate_kbps = config.bitrate_kbps,
            "Initializing x264 encoder"
        );

        let keyframe_interval = (config.fps * config.keyframe_interval_secs.max(1)) as i32;

        let mut setup = x264::Setup::preset(
            x264::Preset::Veryfast,
            x264::Tune::None,
            false, // fast_decode
            true,  // zero_latency
        )
        .fps(config.fps, 1)
        .bitrate(config.bitrate_kbps as i32)
        .max_keyframe_interval(keyframe_interval)
        .scenecut_threshold(0); // predictable keyframe cadence

        setup = match config.profile {
            H264Profile::Baseline => setup.baseline(),
            H264Profile::Main => setup.main(),
            H264Profile::High => setup.high(),
        };

        let mut encoder = setup
            .build(
                x264::Colorspace::NV12,
                config.width as i32,
                config.height as i32,
            )
            .map_err(|e| EncoderError::Initialization(format!("x264 setup failed: {:?}", e)))?;

        let headers = encoder
            .headers()
            .map_or_else(|_| Bytes::new(), |h| Bytes::from(h.entirety().to_vec()));

        debug!(header_size = headers.len(), "x264 encoder initialized");

        Ok(Self {
            encoder,
            config,
            frame_count: 0,
            nv12: Vec::new(),
            headers,
        })
    }
}

impl VideoEncoder for X264Encoder {
    #[instrument(name = "x264_encode", skip(self, data))]
    fn encode(&mut self, data: &[u8], width: u32, height: u32) -> EncoderResult<Bytes> {
        if width != self.config.width || height != self.config.height {
            return Err(EncoderError::InvalidInput(format!(
                "frame is {}x{}, encoder configured for {}x{}",
                width, height, self.config.width, self.config.height
            )));
        }

        let expected = (width * height * 4) as usize;
        if data.len() != expected {
            return Err(EncoderError::InvalidInput(format!(
                "expected {} bytes ({}x{} BGRA), got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }

        trace!(frame = self.frame_count, "Encoding frame");

        bgra_to_nv12(data, width, height, &mut self.nv12);

        let y_size = (width * height) as usize;
        let (y_plane, uv_plane) = self.nv12.split_at(y_size);

        let image = x264::Image::new(
            x264::Colorspace::NV12,
            width as i32,
            height as i32,
            &[
                x264::Plane {
                    data: y_plane,
                    stride: width as i32,
                },
                x264::Plane {
                    data: uv_plane,
                    stride: width as i32,
                },
            ],
        );

        let pts = self.frame_count as i64;
        let (encoded, _picture) = self
            .encoder
            .encode(pts, image)
            .map_err(|e| EncoderError::Encoding(format!("x264 encode failed: {:?}", e)))?;

        self.frame_count += 1;

        // Zero-length output means the frame is buffered in lookahead.
        if encoded.len() == 0 {
            return Ok(Bytes::new());
        }

        Ok(Bytes::from(encoded.entirety().to_vec()))
    }

    fn sequence_params(&self) -> Bytes {
        self.headers.clone()
    }

    fn is_hardware_accelerated(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "x264"
    }
}

impl Drop for X264Encoder {
    fn drop(&mut self) {
        debug!("Closing x264 encoder");
    }
}

// SAFETY: x264::Encoder uses raw pointers internally but is designed for
// single-threaded use. The encoder is only accessed from one thread at a
// time (the frame pump, behind the orchestrator's mutex).
unsafe impl Send for X264Encoder {}
