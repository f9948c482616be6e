//! Link connection state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Confirmed link state, as opposed to the operator's connection intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Status requested, no ACK yet.
    Connecting,
    /// ACK received within the watchdog timeout.
    Connected,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 3] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING..."),
            Self::Connected => write!(f, "CONNECTED"),
        }
    }
}
