//! Error types for railctl-core.

use thiserror::Error;

/// Protocol-level rejections. None of these mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown element namespace '{prefix}' in {raw:?}")]
    UnknownElementNamespace { prefix: char, raw: String },

    #[error("Malformed command {raw:?}: {reason}")]
    MalformedCommand { raw: String, reason: &'static str },

    #[error("Malformed ACK: {0}")]
    MalformedAck(String),

    #[error("Invalid operator command {0:?}")]
    InvalidOperatorCommand(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
