//! Link error types.

use railctl_core::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Send of {payload:?} failed: {source}")]
    Send {
        payload: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("ACK read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("ACK read timed out after {0} ms")]
    ReadTimeout(u64),

    #[error("Outbound queue closed")]
    QueueClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type LinkResult<T> = Result<T, LinkError>;
