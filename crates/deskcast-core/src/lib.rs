//! Core orchestrator for deskcast.
//!
//! This crate owns the lifecycle of capture, encoding, and RTMP
//! publishing: a fixed-rate frame pump drives capture+encode+push
//! cycles, parameter sets are extracted before a publish session is
//! announced, and the active publisher connection lives in a
//! thread-safe, hot-swappable slot.

mod config;
mod error;
mod metrics;
mod pump;
mod slot;
mod state;
mod streamer;

pub use config::{EncodingConfig, PublishState, PublishTarget, TargetId};
pub use error::StreamError;
pub use metrics::{PumpMetrics, PumpSnapshot};
pub use slot::PublisherSlot;
pub use streamer::{LiveControl, Streamer};

use std::time::Duration;

/// Result type for orchestrator operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Display captured when none is selected explicitly.
pub const DEFAULT_DISPLAY_INDEX: u32 = 0;

/// Bound on how long `start_live` blocks on connection setup.
pub const RTMP_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);
