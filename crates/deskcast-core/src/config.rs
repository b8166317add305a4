//! Configuration and per-target publish state.

use serde::{Deserialize, Serialize};

use deskcast_encoder::VideoCodec;

/// Encoding configuration.
///
/// Equality-comparable so settings surfaces can detect whether a change
/// requires a full restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Target bitrate in bits per second.
    pub bitrate_bps: u32,

    /// Target framerate in frames per second.
    pub framerate: u32,

    /// Encoder backend selector.
    pub codec: VideoCodec,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            bitrate_bps: 8_000_000,
            framerate: 25,
            codec: VideoCodec::X264,
        }
    }
}

/// Identifies one publish destination slot.
///
/// One slot is modeled today; further destinations are additive
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetId {
    /// RTMP push to a media server.
    Rtmp,
}

/// Destination settings for one publish target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    /// Destination URL, `rtmp://host[:port]/app/stream`.
    pub url: String,
}

/// Observable publish state for one target.
///
/// Mutated only by the orchestrator in response to start/stop outcomes;
/// read by settings surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishState {
    /// Whether publishing is currently enabled for the target.
    pub enabled: bool,

    /// Human-readable status, cleared on successful (re)start and stop.
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_detection_via_equality() {
        let base = EncodingConfig::default();

        let same = base.clone();
        assert_eq!(base, same);

        let mut faster = base.clone();
        faster.framerate = 30;
        assert_ne!(base, faster);

        let mut hw = base.clone();
        hw.codec = VideoCodec::Nvenc;
        assert_ne!(base, hw);
    }

    #[test]
    fn defaults_match_software_pipeline() {
        let config = EncodingConfig::default();
        assert_eq!(config.bitrate_bps, 8_000_000);
        assert_eq!(config.framerate, 25);
        assert_eq!(config.codec, VideoCodec::X264);
    }
}
