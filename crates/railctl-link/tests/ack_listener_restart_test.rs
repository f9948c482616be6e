//! ACK listener restart tests.
//!
//! A scripted transport injects bind and accept failures so the
//! restart-with-backoff path runs under a paused clock.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use railctl_link::{AckHandler, AckListener, AckListenerConfig, AckTransport};
use std::collections::VecDeque;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

enum Accept {
    Fail,
    Line(&'static [u8]),
}

struct Script {
    /// Outcome of each bind call, initial bind included. Exhausted means ok.
    binds: Mutex<VecDeque<bool>>,
    accepts: Mutex<VecDeque<Accept>>,
    bind_log: Mutex<Vec<(Instant, bool)>>,
}

impl Script {
    fn new(binds: Vec<bool>, accepts: Vec<Accept>) -> Arc<Self> {
        Arc::new(Self {
            binds: Mutex::new(binds.into()),
            accepts: Mutex::new(accepts.into()),
            bind_log: Mutex::new(Vec::new()),
        })
    }

    /// Offsets of every bind attempt from the first one.
    fn bind_offsets(&self) -> Vec<(Duration, bool)> {
        let log = self.bind_log.lock();
        let Some(&(first, _)) = log.first() else {
            return Vec::new();
        };
        log.iter().map(|&(at, ok)| (at - first, ok)).collect()
    }
}

struct ScriptedTransport(Arc<Script>);

impl AckTransport for ScriptedTransport {
    type Listener = ();
    type Stream = Cursor<Vec<u8>>;

    fn bind(&self, _addr: SocketAddr) -> BoxFuture<'_, io::Result<()>> {
        let ok = self.0.binds.lock().pop_front().unwrap_or(true);
        self.0.bind_log.lock().push((Instant::now(), ok));
        Box::pin(async move {
            if ok {
                Ok(())
            } else {
                Err(io::Error::new(io::ErrorKind::AddrInUse, "scripted bind failure"))
            }
        })
    }

    fn accept<'a>(
        &'a self,
        _listener: &'a (),
    ) -> BoxFuture<'a, io::Result<(Cursor<Vec<u8>>, SocketAddr)>> {
        let next = self.0.accepts.lock().pop_front();
        Box::pin(async move {
            match next {
                Some(Accept::Fail) => Err(io::Error::other("scripted accept failure")),
                Some(Accept::Line(bytes)) => Ok((Cursor::new(bytes.to_vec()), peer())),
                None => std::future::pending().await,
            }
        })
    }

    fn local_addr(&self, _listener: &()) -> Option<SocketAddr> {
        None
    }
}

fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

#[derive(Default)]
struct RecordingHandler {
    lines: Mutex<Vec<String>>,
}

impl AckHandler for RecordingHandler {
    fn on_ack(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

fn config(backoff_base: Duration) -> AckListenerConfig {
    AckListenerConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        backoff_base,
        backoff_max: Duration::from_secs(30),
        ..Default::default()
    }
}

async fn spawn_listener(
    script: &Arc<Script>,
    backoff_base: Duration,
) -> (
    Arc<RecordingHandler>,
    CancellationToken,
    tokio::task::JoinHandle<()>,
) {
    let handler = Arc::new(RecordingHandler::default());
    let listener = assert_ok!(
        AckListener::with_transport(
            config(backoff_base),
            handler.clone(),
            ScriptedTransport(script.clone()),
        )
        .await
    );
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(listener.run(shutdown.clone()));
    (handler, shutdown, task)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn test_accept_failure_backs_off_then_rebinds_and_delivers() {
    let script = Script::new(vec![], vec![Accept::Fail, Accept::Line(b"OK\n")]);
    let (handler, shutdown, task) = spawn_listener(&script, ms(500)).await;

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(script.bind_offsets(), vec![(ms(0), true), (ms(500), true)]);
    assert_eq!(*handler.lines.lock(), vec!["OK"]);

    shutdown.cancel();
    assert_ok!(task.await);
}

#[tokio::test(start_paused = true)]
async fn test_failed_rebind_doubles_the_delay() {
    let script = Script::new(
        vec![true, false, true],
        vec![Accept::Fail, Accept::Line(b"OK\n")],
    );
    let (handler, shutdown, task) = spawn_listener(&script, ms(500)).await;

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(
        script.bind_offsets(),
        vec![(ms(0), true), (ms(500), false), (ms(1500), true)]
    );
    assert_eq!(*handler.lines.lock(), vec!["OK"]);

    shutdown.cancel();
    assert_ok!(task.await);
}

#[tokio::test(start_paused = true)]
async fn test_delivered_ack_resets_the_backoff() {
    let script = Script::new(
        vec![],
        vec![
            Accept::Fail,
            Accept::Line(b"first\n"),
            Accept::Fail,
            Accept::Line(b"second\n"),
        ],
    );
    let (handler, shutdown, task) = spawn_listener(&script, ms(500)).await;

    tokio::time::sleep(Duration::from_secs(5)).await;

    // Second restart waits the base delay again, not 1000 ms.
    assert_eq!(
        script.bind_offsets(),
        vec![(ms(0), true), (ms(500), true), (ms(1000), true)]
    );
    assert_eq!(*handler.lines.lock(), vec!["first", "second"]);

    shutdown.cancel();
    assert_ok!(task.await);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_line_does_not_restart() {
    let script = Script::new(vec![], vec![Accept::Line(b""), Accept::Line(b"OK\n")]);
    let (handler, shutdown, task) = spawn_listener(&script, ms(500)).await;

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(script.bind_offsets().len(), 1);
    assert_eq!(*handler.lines.lock(), vec!["OK"]);

    shutdown.cancel();
    assert_ok!(task.await);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_backoff_returns() {
    let script = Script::new(vec![], vec![Accept::Fail]);
    let (handler, shutdown, task) = spawn_listener(&script, Duration::from_secs(30)).await;
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.cancel();

    assert_ok!(assert_ok!(tokio::time::timeout(ms(10), task).await));
    assert!(start.elapsed() < Duration::from_secs(30));
    assert_eq!(script.bind_offsets().len(), 1);
    assert!(handler.lines.lock().is_empty());
}
