//! RTMP publishing transport.
//!
//! This crate provides the publisher session used to push an H.264
//! elementary stream to a media server, plus the NAL-level utilities
//! the pipeline needs around it: parameter-set extraction, keyframe
//! classification, and Annex-B/AVCC/FLV packaging.

mod connection;
mod error;
mod nal;
mod session;

pub use connection::ConnectionState;
pub use error::TransportError;
pub use nal::{
    annex_b_to_avcc, build_avc_decoder_config, build_flv_video_tag, classify_frame,
    extract_parameter_sets, strip_start_code, FrameKind, NalUnitType, ParameterSet,
};
pub use session::{PublisherSession, SessionStatistics};

use bytes::Bytes;

/// Channel capacity for outgoing frames.
pub const PACKET_CHANNEL_CAPACITY: usize = 30;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// One encoded video frame on its way to the publisher.
///
/// The payload is start-code-free (leading framing marker stripped);
/// interior start codes from multi-record access units are handled by
/// the session's AVCC conversion.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded access-unit bytes, leading start code removed.
    pub payload: Bytes,

    /// Keyframe or delta classification.
    pub kind: FrameKind,

    /// Capture timestamp in milliseconds since the pump started.
    pub timestamp_ms: u32,
}
