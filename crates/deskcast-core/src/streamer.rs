//! The capture–encode–publish orchestrator.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use deskcast_capture::{enumerate_displays, open_capture, PixelFormat, RawFrame};
use deskcast_encoder::{create_video_encoder, EncoderConfig, H264Profile};
use deskcast_transport::{extract_parameter_sets, PublisherSession};

use crate::config::{EncodingConfig, PublishState, PublishTarget, TargetId};
use crate::error::StreamError;
use crate::metrics::PumpSnapshot;
use crate::pump;
use crate::state::Pipeline;
use crate::{StreamResult, DEFAULT_DISPLAY_INDEX, RTMP_CONNECT_TIMEOUT};

/// Control interface offered to settings surfaces.
///
/// Implemented by [`Streamer`]; the surface holds a borrowed trait
/// object whose lifetime it manages, so the orchestrator never owns a
/// callback back into UI code.
pub trait LiveControl: Send + Sync {
    /// Apply the encoder settings (restarting the pipeline when they
    /// changed) and start publishing to `target`.
    fn start_live(&self, target: TargetId, encoding: &EncodingConfig, publish: &PublishTarget)
        -> bool;

    /// Stop publishing to `target`.
    fn stop_live(&self, target: TargetId);
}

/// Orchestrates capture, encoding, and publishing for one desktop
/// stream.
///
/// Construct one per process and pass it to whoever needs it; all
/// methods take `&self` and are safe to call from UI and timer threads
/// concurrently with the pump.
pub struct Streamer {
    pipeline: Arc<Pipeline>,
    av_config: Mutex<EncodingConfig>,
    initialized: AtomicBool,
    pump_thread: Mutex<Option<JoinHandle<()>>>,
    rtmp_state: Mutex<PublishState>,
}

impl Streamer {
    /// Create an uninitialized orchestrator.
    pub fn new() -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new()),
            av_config: Mutex::new(EncodingConfig::default()),
            initialized: AtomicBool::new(false),
            pump_thread: Mutex::new(None),
            rtmp_state: Mutex::new(PublishState::default()),
        }
    }

    /// Start capture and encoding with `config`.
    ///
    /// Re-initializing an initialized orchestrator tears everything
    /// down first. A capture failure leaves the orchestrator untouched;
    /// an encoder failure rolls capture back, so no half-initialized
    /// state survives.
    #[instrument(name = "streamer_init", skip_all)]
    pub fn init(&self, config: &EncodingConfig) -> StreamResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            self.destroy();
        }

        self.start_capture()?;

        if let Err(e) = self.start_encoder(config) {
            self.stop_capture();
            return Err(e);
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("Streamer initialized");
        Ok(())
    }

    /// Tear everything down, returning to the uninitialized state.
    /// Safe to call from any lifecycle state, any number of times.
    #[instrument(name = "streamer_destroy", skip_all)]
    pub fn destroy(&self) {
        if let Some(session) = self.pipeline.publisher.take() {
            session.close();
        }
        *self.rtmp_state.lock() = PublishState::default();

        self.stop_encoder();
        self.stop_capture();

        self.initialized.store(false, Ordering::SeqCst);
        debug!("Streamer destroyed");
    }

    /// Whether `init` has completed since the last `destroy`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Select a capture backend for the default display.
    ///
    /// Fails with [`StreamError::NoDisplay`] when enumeration comes
    /// back empty; backend preference and fallback live in the capture
    /// factory.
    pub fn start_capture(&self) -> StreamResult<()> {
        if self.pipeline.capture_active.load(Ordering::SeqCst) {
            return Ok(());
        }

        let displays = enumerate_displays()?;
        if displays.is_empty() {
            return Err(StreamError::NoDisplay);
        }
        for (index, disp) in displays.iter().enumerate() {
            debug!(
                index,
                width = disp.width(),
                height = disp.height(),
                "Display found"
            );
        }

        let capture = open_capture(DEFAULT_DISPLAY_INDEX)?;
        info!(backend = capture.backend().name(), "Capture started");

        *self.pipeline.capture.lock() = Some(capture);
        self.pipeline.capture_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Release the capture backend. No-op if capture never started.
    pub fn stop_capture(&self) {
        if self.pipeline.capture_active.swap(false, Ordering::SeqCst) {
            *self.pipeline.capture.lock() = None;
            debug!("Capture stopped");
        }
    }

    /// Configure the encoder from `config` and the capture dimensions,
    /// then spawn the frame pump.
    ///
    /// Requires capture to be active. An already-running encoder is
    /// stopped first so at most one pump thread ever exists.
    #[instrument(name = "start_encoder", skip_all)]
    pub fn start_encoder(&self, config: &EncodingConfig) -> StreamResult<()> {
        if !self.pipeline.capture_active.load(Ordering::SeqCst) {
            return Err(StreamError::CaptureNotStarted);
        }
        if self.pipeline.encoder_active.load(Ordering::SeqCst) {
            self.stop_encoder();
        }

        let (width, height) = {
            let capture = self.pipeline.capture.lock();
            let capture = capture.as_ref().ok_or(StreamError::CaptureNotStarted)?;
            (capture.width(), capture.height())
        };

        let encoder_config = EncoderConfig {
            width,
            height,
            fps: config.framerate,
            bitrate_kbps: config.bitrate_bps / 1000,
            // gop tracks the framerate, one keyframe per second.
            keyframe_interval_secs: 1,
            pixel_format: PixelFormat::Bgra,
            profile: H264Profile::High,
        };
        let encoder = create_video_encoder(encoder_config, config.codec)?;
        info!(codec = encoder.name(), width, height, "Encoder started");

        *self.av_config.lock() = config.clone();
        *self.pipeline.encoder.lock() = Some(encoder);
        self.pipeline.metrics.reset();
        self.pipeline.encoder_active.store(true, Ordering::SeqCst);

        let pipeline = Arc::clone(&self.pipeline);
        let framerate = config.framerate;
        let handle = thread::spawn(move || pump::run(pipeline, framerate));
        *self.pump_thread.lock() = Some(handle);

        Ok(())
    }

    /// Signal the pump to stop, join it, and release the encoder.
    pub fn stop_encoder(&self) {
        if !self.pipeline.encoder_active.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.pump_thread.lock().take() {
            let _ = handle.join();
        }
        *self.pipeline.encoder.lock() = None;
        debug!("Encoder stopped");
    }

    /// Whether the encoder (and its pump) is running.
    pub fn is_encoder_started(&self) -> bool {
        self.pipeline.encoder_active.load(Ordering::SeqCst)
    }

    /// Open a publisher session to `publish.url` and make it the active
    /// handle for `target`.
    ///
    /// Requires the encoder to be running (the session is announced
    /// with the encoder's parameter sets). A replaced session is closed
    /// after the new one is installed.
    #[instrument(name = "start_live", skip_all, fields(url = %publish.url))]
    pub fn start_live(&self, target: TargetId, publish: &PublishTarget) -> StreamResult<()> {
        match target {
            TargetId::Rtmp => self.start_rtmp(publish),
        }
    }

    fn start_rtmp(&self, publish: &PublishTarget) -> StreamResult<()> {
        if !self.pipeline.encoder_active.load(Ordering::SeqCst) {
            return Err(StreamError::EncoderNotStarted);
        }

        let extradata = {
            let encoder = self.pipeline.encoder.lock();
            encoder
                .as_ref()
                .ok_or(StreamError::EncoderNotStarted)?
                .sequence_params()
        };

        // The PPS may be absent; publishing proceeds with the SPS alone.
        let params = extract_parameter_sets(&extradata).ok_or(StreamError::NoParameterSet)?;

        let session = Arc::new(PublisherSession::new());
        session.set_media_info(params);

        if let Err(e) = session.open(&publish.url, RTMP_CONNECT_TIMEOUT) {
            warn!(url = %publish.url, "RTMP open failed: {}", e);
            let mut state = self.rtmp_state.lock();
            state.enabled = false;
            state.status = format!("failed: {e}");
            return Err(e.into());
        }

        if let Some(previous) = self.pipeline.publisher.install(session) {
            previous.close();
        }

        let mut state = self.rtmp_state.lock();
        state.enabled = true;
        state.status.clear();

        info!(url = %publish.url, "RTMP push started");
        Ok(())
    }

    /// Close and clear the active session for `target`. No-op when no
    /// session is active.
    #[instrument(name = "stop_live", skip(self))]
    pub fn stop_live(&self, target: TargetId) {
        match target {
            TargetId::Rtmp => {
                // Swap the handle out first; the slot never points at a
                // closed session.
                if let Some(session) = self.pipeline.publisher.take() {
                    session.close();
                    info!("RTMP push stopped");
                }

                let mut state = self.rtmp_state.lock();
                state.enabled = false;
                state.status.clear();
            }
        }
    }

    /// Connection status of the active session for `target`.
    pub fn is_connected(&self, target: TargetId) -> bool {
        match target {
            TargetId::Rtmp => self
                .pipeline
                .publisher
                .with(|session| session.is_connected())
                .unwrap_or(false),
        }
    }

    /// Observable publish state for `target`.
    pub fn publish_state(&self, target: TargetId) -> PublishState {
        match target {
            TargetId::Rtmp => self.rtmp_state.lock().clone(),
        }
    }

    /// Latest raw frame for preview rendering.
    ///
    /// Serialized with the pump's own capture call through the capture
    /// mutex, so the backend only ever sees one caller at a time.
    pub fn screen_image(&self) -> Option<RawFrame> {
        let mut capture = self.pipeline.capture.lock();
        capture.as_mut().and_then(|c| c.capture_frame().ok())
    }

    /// Pump telemetry snapshot.
    pub fn pump_snapshot(&self) -> PumpSnapshot {
        self.pipeline.metrics.snapshot()
    }

    /// Human-readable status: codec, measured framerate, and per-target
    /// connection status. Pure read.
    pub fn status_info(&self) -> String {
        let mut info = String::new();

        if self.pipeline.encoder_active.load(Ordering::SeqCst) {
            let config = self.av_config.lock();
            let _ = writeln!(info, "codec: {}", config.codec);
            let _ = writeln!(info, "fps: {}", self.pipeline.metrics.fps());
        }

        if let Some(connected) = self.pipeline.publisher.with(|s| s.is_connected()) {
            let status = if connected { "publishing" } else { "disconnected" };
            let _ = writeln!(info, "rtmp: {status}");
        }

        info
    }

    /// Apply a new encoding configuration.
    ///
    /// No-op when the orchestrator is initialized with an equal config;
    /// otherwise a full teardown-and-restart.
    pub fn reconfigure(&self, config: &EncodingConfig) -> StreamResult<()> {
        if self.is_initialized() && *self.av_config.lock() == *config {
            return Ok(());
        }
        self.init(config)
    }
}

impl Default for Streamer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl LiveControl for Streamer {
    fn start_live(
        &self,
        target: TargetId,
        encoding: &EncodingConfig,
        publish: &PublishTarget,
    ) -> bool {
        if self.reconfigure(encoding).is_err() {
            return false;
        }
        Streamer::start_live(self, target, publish).is_ok()
    }

    fn stop_live(&self, target: TargetId) {
        Streamer::stop_live(self, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtmp_target() -> PublishTarget {
        PublishTarget {
            url: "rtmp://127.0.0.1/live/test".to_string(),
        }
    }

    #[test]
    fn start_live_before_init_fails_and_leaves_no_session() {
        let streamer = Streamer::new();

        let err = streamer
            .start_live(TargetId::Rtmp, &rtmp_target())
            .unwrap_err();
        assert!(matches!(err, StreamError::EncoderNotStarted));
        assert!(!streamer.is_connected(TargetId::Rtmp));
        assert!(streamer.pipeline.publisher.is_empty());
    }

    #[test]
    fn stop_live_without_session_is_noop() {
        let streamer = Streamer::new();

        streamer.stop_live(TargetId::Rtmp);

        assert!(!streamer.is_connected(TargetId::Rtmp));
        let state = streamer.publish_state(TargetId::Rtmp);
        assert!(!state.enabled);
        assert!(state.status.is_empty());
    }

    #[test]
    fn destroy_is_idempotent_from_any_state() {
        let streamer = Streamer::new();

        streamer.destroy();
        streamer.destroy();

        assert!(!streamer.is_initialized());
        assert!(!streamer.is_encoder_started());
        assert!(streamer.pipeline.publisher.is_empty());
    }

    #[test]
    fn status_info_is_empty_when_idle() {
        let streamer = Streamer::new();
        assert!(streamer.status_info().is_empty());
    }

    #[cfg(not(windows))]
    #[test]
    fn init_cycles_leave_uninitialized_state_unchanged() {
        let streamer = Streamer::new();
        let config = EncodingConfig::default();

        for _ in 0..3 {
            // Headless hosts have nothing to capture; the failed init
            // must roll back completely every time.
            let err = streamer.init(&config).unwrap_err();
            assert!(matches!(err, StreamError::NoDisplay));
            streamer.destroy();

            assert!(!streamer.is_initialized());
            assert!(!streamer.is_encoder_started());
            assert!(streamer.pipeline.publisher.is_empty());
            assert!(streamer.status_info().is_empty());
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn live_control_start_before_init_returns_false() {
        let streamer = Streamer::new();
        let control: &dyn LiveControl = &streamer;

        let started = control.start_live(
            TargetId::Rtmp,
            &EncodingConfig::default(),
            &rtmp_target(),
        );

        assert!(!started);
        assert!(!streamer.is_connected(TargetId::Rtmp));
        assert!(streamer.pipeline.publisher.is_empty());
    }

    #[cfg(not(windows))]
    #[test]
    fn reconfigure_before_init_attempts_full_init() {
        let streamer = Streamer::new();
        let config = EncodingConfig::default();

        assert!(streamer.reconfigure(&config).is_err());
        assert!(!streamer.is_initialized());
    }
}
