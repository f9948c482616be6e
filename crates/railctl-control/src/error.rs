//! Control error types.

use railctl_core::ProtocolError;
use railctl_link::LinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Rejected: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

impl ControlError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Protocol(ProtocolError::UnknownElementNamespace { .. }) => "unknown_namespace",
            Self::Protocol(ProtocolError::MalformedCommand { .. }) => "malformed",
            Self::Protocol(ProtocolError::InvalidOperatorCommand(_)) => "invalid_operator",
            Self::Protocol(ProtocolError::MalformedAck(_)) => "malformed_ack",
            Self::Link(_) => "link",
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
