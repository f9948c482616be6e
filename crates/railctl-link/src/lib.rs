//! Transport and link supervision for the railctl layout controller.
//!
//! Provides:
//! - A single ordered outbound queue drained by one UDP broadcast writer
//! - A bounded-line TCP ACK listener that restarts with backoff after failures
//! - The link supervisor state machine (Disconnected/Connecting/Connected)
//!   with heartbeat and watchdog tasks

pub mod ack_listener;
pub mod error;
pub mod outbound;
pub mod supervisor;

pub use ack_listener::{
    AckHandler, AckListener, AckListenerConfig, AckTransport, TcpTransport, DEFAULT_MAX_LINE_BYTES,
};
pub use error::{LinkError, LinkResult};
pub use outbound::{
    outbound_channel, DatagramSink, OutboundHandle, OutboundReceiver, OutboundWriter,
    UdpBroadcastSink,
};
pub use supervisor::{LinkConfig, LinkSnapshot, LinkSupervisor};
