//! Pump telemetry.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Counters published by the frame pump and read by the status surface.
///
/// The effective framerate is measured by the pump itself: a rolling
/// counter republished once per second.
#[derive(Debug, Default)]
pub struct PumpMetrics {
    encoding_fps: AtomicU32,
    frames_encoded: AtomicU64,
    bytes_encoded: AtomicU64,
}

/// Point-in-time view of the pump counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpSnapshot {
    /// Frames encoded during the last full second.
    pub fps: u32,

    /// Frames encoded since the pump started.
    pub frames_encoded: u64,

    /// Elementary-stream bytes produced since the pump started.
    pub bytes_encoded: u64,
}

impl PumpMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successfully encoded frame.
    pub fn record_frame(&self, bytes: usize) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.bytes_encoded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Publish the measured framerate for the elapsed second.
    pub fn publish_fps(&self, fps: u32) {
        self.encoding_fps.store(fps, Ordering::Relaxed);
    }

    /// Most recently published effective framerate.
    pub fn fps(&self) -> u32 {
        self.encoding_fps.load(Ordering::Relaxed)
    }

    /// Zero all counters (new encoder run).
    pub fn reset(&self) {
        self.encoding_fps.store(0, Ordering::Relaxed);
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.bytes_encoded.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of the counters.
    pub fn snapshot(&self) -> PumpSnapshot {
        PumpSnapshot {
            fps: self.fps(),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            bytes_encoded: self.bytes_encoded.load(Ordering::Relaxed),
        }
    }
}
