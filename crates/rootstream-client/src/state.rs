//! Connection state

use std::fmt;

/// Where a [`TransportSession`](crate::TransportSession) is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected and receiving media
    Streaming,
    Reconnecting,
    Error(String),
}

impl ConnectionState {
    /// Connected or Streaming
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Streaming)
    }

    /// States `connect()` may start from
    pub fn can_connect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }

    /// Status line for display
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Streaming => write!(f, "streaming"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectable_states() {
        assert!(ConnectionState::Disconnected.can_connect());
        assert!(ConnectionState::Error("x".into()).can_connect());
        assert!(!ConnectionState::Connecting.can_connect());
        assert!(!ConnectionState::Reconnecting.can_connect());
        assert!(!ConnectionState::Streaming.can_connect());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ConnectionState::Error("refused".into()).to_string(),
            "error: refused"
        );
    }
}
