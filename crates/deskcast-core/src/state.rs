//! Shared pipeline state.

use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;

use deskcast_capture::ScreenCapture;
use deskcast_encoder::VideoEncoder;
use deskcast_transport::PublisherSession;

use crate::metrics::PumpMetrics;
use crate::slot::PublisherSlot;

/// State shared between the orchestrator's API surface and the frame
/// pump thread.
///
/// The capture mutex serializes the pump's capture call with the
/// preview path; the publisher slot carries its own lock discipline.
/// The two active flags double as the pump's run condition.
pub(crate) struct Pipeline {
    /// Active capture backend, exclusively owned.
    pub(crate) capture: Mutex<Option<Box<dyn ScreenCapture>>>,

    /// Active video encoder, exclusively owned.
    pub(crate) encoder: Mutex<Option<Box<dyn VideoEncoder>>>,

    /// Hot-swappable handle to the active publisher session.
    pub(crate) publisher: PublisherSlot<PublisherSession>,

    /// Capture lifecycle flag; cleared by `stop_capture`.
    pub(crate) capture_active: AtomicBool,

    /// Encoder lifecycle flag; clearing it is the pump's stop signal.
    pub(crate) encoder_active: AtomicBool,

    /// Telemetry published by the pump.
    pub(crate) metrics: PumpMetrics,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self {
            capture: Mutex::new(None),
            encoder: Mutex::new(None),
            publisher: PublisherSlot::new(),
            capture_active: AtomicBool::new(false),
            encoder_active: AtomicBool::new(false),
            metrics: PumpMetrics::new(),
        }
    }
}
