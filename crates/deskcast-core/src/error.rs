//! Error taxonomy for the orchestrator.

use thiserror::Error;

use deskcast_capture::CaptureError;
use deskcast_encoder::EncoderError;
use deskcast_transport::TransportError;

/// Errors surfaced by orchestrator lifecycle operations.
///
/// Per-frame failures inside the pump are recovered locally and never
/// appear here; re-initializing an initialized orchestrator is a
/// teardown-and-restart, not an error.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Display enumeration came back empty.
    #[error("No display found")]
    NoDisplay,

    /// An operation that requires capture ran before `start_capture`.
    #[error("Capture not started")]
    CaptureNotStarted,

    /// An operation that requires the encoder ran before `start_encoder`.
    #[error("Encoder not started")]
    EncoderNotStarted,

    /// The encoder's extradata carries no sequence parameter set.
    #[error("No sequence parameter set in encoder extradata")]
    NoParameterSet,

    /// Capture backend failure.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Encoder rejected its configuration or failed.
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Opening the publisher connection failed.
    #[error("Publish open failed: {0}")]
    PublishOpen(#[from] TransportError),
}
