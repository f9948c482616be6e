//! Outbound command path.
//!
//! Every command goes through one unbounded FIFO queue drained by a single
//! writer task, so wire order equals enqueue order (e.g. `EMERGENCY_STOP_ON`
//! always precedes the per-block off-commands that follow it).
//!
//! Delivery is fire-and-forget: no confirmation, no retry, no correlation
//! with ACKs. Send failures are logged, counted and posted to the status
//! board, then dropped.

use crate::error::{LinkError, LinkResult};
use futures_util::future::BoxFuture;
use railctl_core::{Command, StatusBoard};
use railctl_telemetry::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiving end of the outbound queue, consumed by [`OutboundWriter`].
pub type OutboundReceiver = mpsc::UnboundedReceiver<Command>;

/// Create the outbound queue.
pub fn outbound_channel() -> (OutboundHandle, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutboundHandle { tx }, rx)
}

/// Cloneable handle for enqueueing commands.
///
/// `send` never blocks, so callers can enqueue while holding a lock and keep
/// their decision and emission order identical.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl OutboundHandle {
    /// Queue a command for transmission.
    ///
    /// # Errors
    ///
    /// `LinkError::QueueClosed` once the writer has shut down.
    pub fn send(&self, command: Command) -> LinkResult<()> {
        debug!(payload = %command, "Command queued");
        self.tx.send(command).map_err(|_| LinkError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Destination for encoded datagrams.
pub trait DatagramSink: Send + Sync + 'static {
    /// Transmit one payload.
    fn send<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, LinkResult<()>>;
}

/// UDP broadcast sink.
///
/// Each send binds a transient socket, enables `SO_BROADCAST`, transmits a
/// single datagram to `target` and closes the socket.
#[derive(Debug, Clone)]
pub struct UdpBroadcastSink {
    target: SocketAddr,
}

impl UdpBroadcastSink {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl DatagramSink for UdpBroadcastSink {
    fn send<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, LinkResult<()>> {
        Box::pin(async move {
            let local: SocketAddr = if self.target.is_ipv4() {
                SocketAddr::from(([0, 0, 0, 0], 0))
            } else {
                SocketAddr::from(([0u16; 8], 0))
            };
            let socket = UdpSocket::bind(local)
                .await
                .map_err(|source| LinkError::Bind {
                    addr: local,
                    source,
                })?;
            let send_err = |source| LinkError::Send {
                payload: payload.to_string(),
                source,
            };
            socket.set_broadcast(true).map_err(send_err)?;
            socket
                .send_to(payload.as_bytes(), self.target)
                .await
                .map_err(send_err)?;
            Ok(())
        })
    }
}

/// Single writer draining the outbound queue.
pub struct OutboundWriter<S: DatagramSink> {
    rx: OutboundReceiver,
    sink: S,
    status: Arc<StatusBoard>,
}

impl<S: DatagramSink> OutboundWriter<S> {
    pub fn new(rx: OutboundReceiver, sink: S, status: Arc<StatusBoard>) -> Self {
        Self { rx, sink, status }
    }

    /// Drain the queue until every handle is dropped or shutdown is
    /// requested. On shutdown, commands already queued are still sent.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Outbound writer started");
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.rx.close();
                    while let Some(command) = self.rx.recv().await {
                        self.transmit(&command).await;
                    }
                    info!("Outbound writer stopped (shutdown)");
                    return;
                }
                next = self.rx.recv() => {
                    match next {
                        Some(command) => self.transmit(&command).await,
                        None => {
                            info!("Outbound writer stopped (queue closed)");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn transmit(&self, command: &Command) {
        let payload = command.to_wire();
        let kind = command.kind_label();
        match self.sink.send(&payload).await {
            Ok(()) => {
                debug!(%payload, "Datagram sent");
                Metrics::datagram_sent(kind);
                self.status.post(format!("Sent: {payload}"));
            }
            Err(e) => {
                warn!(%payload, error = %e, "Datagram send failed");
                Metrics::datagram_failed(kind);
                self.status.post(format!("Error: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use railctl_core::SystemCommand;

    /// Records payloads; fails for any payload listed in `fail_on`.
    #[derive(Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<String>>>,
        fail_on: Vec<String>,
    }

    impl DatagramSink for RecordingSink {
        fn send<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, LinkResult<()>> {
            Box::pin(async move {
                if self.fail_on.iter().any(|p| p == payload) {
                    return Err(LinkError::Send {
                        payload: payload.to_string(),
                        source: std::io::Error::new(std::io::ErrorKind::Other, "unreachable"),
                    });
                }
                self.sent.lock().push(payload.to_string());
                Ok(())
            })
        }
    }

    fn cmd(raw: &str) -> Command {
        Command::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (handle, rx) = outbound_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            sent: sent.clone(),
            fail_on: Vec::new(),
        };
        let status = Arc::new(StatusBoard::default());

        handle.send(cmd("EMERGENCY_STOP_ON")).unwrap();
        handle.send(cmd("B0010")).unwrap();
        handle.send(cmd("B1010")).unwrap();
        drop(handle);

        OutboundWriter::new(rx, sink, status.clone())
            .run(CancellationToken::new())
            .await;

        assert_eq!(
            *sent.lock(),
            vec!["EMERGENCY_STOP_ON", "B0010", "B1010"]
        );
        assert_eq!(status.message(), "Sent: B1010");
    }

    #[tokio::test]
    async fn test_send_failure_is_not_retried() {
        let (handle, rx) = outbound_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            sent: sent.clone(),
            fail_on: vec!["W0011".to_string()],
        };
        let status = Arc::new(StatusBoard::default());

        handle.send(cmd("W0011")).unwrap();
        drop(handle);

        OutboundWriter::new(rx, sink, status.clone())
            .run(CancellationToken::new())
            .await;

        assert!(sent.lock().is_empty());
        assert!(status.message().starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_commands() {
        let (handle, rx) = outbound_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            sent: sent.clone(),
            fail_on: Vec::new(),
        };
        let shutdown = CancellationToken::new();

        handle
            .send(Command::System(SystemCommand::EmergencyStopOn))
            .unwrap();
        shutdown.cancel();

        OutboundWriter::new(rx, sink, Arc::new(StatusBoard::default()))
            .run(shutdown)
            .await;

        assert_eq!(*sent.lock(), vec!["EMERGENCY_STOP_ON"]);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(Command::System(SystemCommand::Heartbeat)),
            Err(LinkError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_udp_sink_delivers_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink = UdpBroadcastSink::new(receiver.local_addr().unwrap());

        sink.send("B0011").await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"B0011");
    }
}
