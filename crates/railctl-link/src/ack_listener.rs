//! Inbound ACK listener.
//!
//! A single server socket accepts one peer at a time, reads exactly one
//! line, hands it to the [`AckHandler`] and closes the connection before
//! accepting the next peer. The content is opaque: any line is proof of
//! liveness.
//!
//! Lines are capped at `max_line_bytes`; a peer that streams more is
//! rejected without its input being buffered.
//!
//! If the accept loop itself fails, the listener is rebuilt with
//! exponential backoff instead of stopping ACK processing for good.

use crate::error::{LinkError, LinkResult};
use futures_util::future::BoxFuture;
use railctl_core::ProtocolError;
use railctl_telemetry::Metrics;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receiver of ACK lines.
pub trait AckHandler: Send + Sync + 'static {
    fn on_ack(&self, line: &str);
}

/// Server-socket operations used by the listener.
pub trait AckTransport: Send + Sync + 'static {
    type Listener: Send + Sync + 'static;
    type Stream: AsyncRead + Unpin + Send + 'static;

    fn bind(&self, addr: SocketAddr) -> BoxFuture<'_, io::Result<Self::Listener>>;

    fn accept<'a>(
        &'a self,
        listener: &'a Self::Listener,
    ) -> BoxFuture<'a, io::Result<(Self::Stream, SocketAddr)>>;

    fn local_addr(&self, listener: &Self::Listener) -> Option<SocketAddr>;
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl AckTransport for TcpTransport {
    type Listener = TcpListener;
    type Stream = TcpStream;

    fn bind(&self, addr: SocketAddr) -> BoxFuture<'_, io::Result<TcpListener>> {
        Box::pin(TcpListener::bind(addr))
    }

    fn accept<'a>(
        &'a self,
        listener: &'a TcpListener,
    ) -> BoxFuture<'a, io::Result<(TcpStream, SocketAddr)>> {
        Box::pin(listener.accept())
    }

    fn local_addr(&self, listener: &TcpListener) -> Option<SocketAddr> {
        listener.local_addr().ok()
    }
}

/// Default cap on one ACK line, terminator excluded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct AckListenerConfig {
    /// Address the server socket binds to.
    pub addr: SocketAddr,
    /// Per-connection read timeout. `None` waits forever, so one silent peer
    /// stalls every later ACK.
    pub read_timeout: Option<Duration>,
    /// Longest accepted line. Longer input is rejected as malformed.
    pub max_line_bytes: usize,
    /// Base delay for restart backoff.
    pub backoff_base: Duration,
    /// Maximum delay for restart backoff.
    pub backoff_max: Duration,
}

impl Default for AckListenerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 6000)),
            read_timeout: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// ACK listener.
pub struct AckListener<T: AckTransport = TcpTransport> {
    config: AckListenerConfig,
    transport: T,
    listener: Option<T::Listener>,
    handler: Arc<dyn AckHandler>,
}

impl AckListener<TcpTransport> {
    /// Bind the TCP server socket.
    ///
    /// # Errors
    ///
    /// `LinkError::Bind` if the address is unavailable.
    pub async fn bind(config: AckListenerConfig, handler: Arc<dyn AckHandler>) -> LinkResult<Self> {
        Self::with_transport(config, handler, TcpTransport).await
    }
}

impl<T: AckTransport> AckListener<T> {
    /// Bind through `transport`.
    pub async fn with_transport(
        config: AckListenerConfig,
        handler: Arc<dyn AckHandler>,
        transport: T,
    ) -> LinkResult<Self> {
        let listener = bind_listener(&transport, config.addr).await?;
        info!(addr = %config.addr, "ACK listener bound");
        Ok(Self {
            config,
            transport,
            listener: Some(listener),
            handler,
        })
    }

    /// Actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|l| self.transport.local_addr(l))
    }

    /// Run the accept loop until shutdown, restarting after failures.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut attempt = 0u32;

        loop {
            if shutdown.is_cancelled() {
                info!("ACK listener stopped");
                return;
            }

            let listener = match self.listener.take() {
                Some(listener) => listener,
                None => match bind_listener(&self.transport, self.config.addr).await {
                    Ok(listener) => {
                        info!(addr = %self.config.addr, attempt, "ACK listener rebound");
                        listener
                    }
                    Err(e) => {
                        error!(error = %e, attempt, "ACK listener rebind failed");
                        attempt = attempt.saturating_add(1);
                        if !self.wait_backoff(attempt, &shutdown).await {
                            return;
                        }
                        continue;
                    }
                },
            };

            match self.serve(&listener, &shutdown, &mut attempt).await {
                Ok(()) => {
                    info!("ACK listener stopped");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "ACK accept loop failed, restarting");
                    Metrics::listener_restart();
                    drop(listener);
                    attempt = attempt.saturating_add(1);
                    if !self.wait_backoff(attempt, &shutdown).await {
                        return;
                    }
                }
            }
        }
    }

    /// Accept loop. Returns `Ok` on shutdown, `Err` when accept fails.
    async fn serve(
        &self,
        listener: &T::Listener,
        shutdown: &CancellationToken,
        attempt: &mut u32,
    ) -> LinkResult<()> {
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                accepted = self.transport.accept(listener) => accepted.map_err(LinkError::Accept)?,
            };

            // One peer at a time: the next accept waits for this read.
            let read = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                read = read_ack_line(stream, self.config.read_timeout, self.config.max_line_bytes) => read,
            };

            match read {
                Ok(line) => {
                    debug!(%peer, %line, "ACK received");
                    Metrics::ack_received();
                    *attempt = 0;
                    self.handler.on_ack(&line);
                }
                Err(LinkError::Protocol(e)) => {
                    warn!(%peer, error = %e, "Rejected ACK");
                    Metrics::ack_malformed();
                }
                Err(e) => {
                    warn!(%peer, error = %e, "ACK connection failed");
                }
            }
        }
    }

    /// Sleep for the backoff delay. Returns `false` if shutdown interrupted it.
    async fn wait_backoff(&self, attempt: u32, shutdown: &CancellationToken) -> bool {
        let delay = backoff_delay(attempt, self.config.backoff_base, self.config.backoff_max);
        warn!(attempt, delay_ms = delay.as_millis() as u64, "ACK listener backing off");
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = shutdown.cancelled() => {
                info!("Shutdown requested during ACK listener backoff");
                false
            }
        }
    }
}

async fn bind_listener<T: AckTransport>(transport: &T, addr: SocketAddr) -> LinkResult<T::Listener> {
    transport
        .bind(addr)
        .await
        .map_err(|source| LinkError::Bind { addr, source })
}

/// Read exactly one line of at most `max_len` bytes from `stream`, without
/// its terminator.
///
/// The stream is dropped (closed) on return.
async fn read_ack_line<S: AsyncRead + Unpin>(
    stream: S,
    timeout: Option<Duration>,
    max_len: usize,
) -> LinkResult<String> {
    // Room for the line plus "\r\n"; anything beyond is never buffered.
    let limit = max_len.saturating_add(2) as u64;
    let mut reader = BufReader::new(stream.take(limit));
    let mut buf = Vec::new();

    let read = reader.read_until(b'\n', &mut buf);
    let n = match timeout {
        Some(after) => tokio::time::timeout(after, read)
            .await
            .map_err(|_| LinkError::ReadTimeout(after.as_millis() as u64))?,
        None => read.await,
    }
    .map_err(LinkError::Read)?;

    if n == 0 {
        return Err(ProtocolError::MalformedAck("peer closed without sending a line".into()).into());
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }

    if buf.len() > max_len {
        return Err(ProtocolError::MalformedAck(format!("line exceeds {max_len} bytes")).into());
    }

    String::from_utf8(buf)
        .map_err(|_| ProtocolError::MalformedAck("line is not valid UTF-8".into()).into())
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
///
/// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}
