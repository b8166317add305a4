//! Publisher connection state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one publisher session.
///
/// `Closed` is terminal: publishing again means constructing a new
/// session. There is no automatic reconnect; retry policy belongs to
/// the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Constructed, not yet opened.
    #[default]
    Idle,

    /// Handshake and publish negotiation in progress.
    Connecting,

    /// Connected and publishing.
    Connected,

    /// Torn down, or the connection was lost.
    Closed,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the connection attempt is still in flight.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Get status message for UI.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "publishing",
            Self::Closed => "disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_predicate() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Closed.is_connected());
        assert!(!ConnectionState::Idle.is_connected());
    }

    #[test]
    fn default_is_idle() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }
}
