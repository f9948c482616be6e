//! Link supervisor.
//!
//! Owns the operator's connection intent, the last-ACK timestamp and the
//! Disconnected/Connecting/Connected state machine, and runs the periodic
//! heartbeat and watchdog tasks.
//!
//! Transitions:
//! - `connect`: intent on, clock reset, `PING_STATUS` queued, tasks
//!   (re)started, Disconnected -> Connecting
//! - ACK while intent is on: clock reset, Connecting|Connected -> Connected
//! - watchdog: Connected -> Disconnected once the last ACK is older than the
//!   timeout; never promotes
//! - `disconnect`: intent off, tasks cancelled, -> Disconnected
//! - `suspend` / `resume`: tasks paused and restarted, intent kept
//!
//! A watchdog demotion does not stop the heartbeat and does not start any
//! reconnection logic; the next ACK restores Connected.

use crate::ack_listener::AckHandler;
use crate::error::LinkResult;
use crate::outbound::OutboundHandle;
use parking_lot::Mutex;
use railctl_core::{Command, ConnectionState, StatusBoard, SystemCommand};
use railctl_telemetry::Metrics;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Link supervision timing.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Heartbeat broadcast period.
    pub heartbeat_interval: Duration,
    /// Watchdog check period.
    pub watchdog_period: Duration,
    /// Maximum ACK age before Connected is demoted.
    pub watchdog_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            watchdog_period: Duration::from_secs(1),
            watchdog_timeout: Duration::from_millis(5000),
        }
    }
}

/// Point-in-time view for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSnapshot {
    pub state: ConnectionState,
    pub desired: bool,
    pub ms_since_last_ack: u64,
    pub tasks_running: bool,
}

struct LinkInner {
    desired: bool,
    state: ConnectionState,
    last_ack: Instant,
    /// Cancels the running heartbeat/watchdog pair, if any.
    tasks: Option<CancellationToken>,
}

/// Link supervisor. Share via `Arc<LinkSupervisor>`.
pub struct LinkSupervisor {
    config: LinkConfig,
    inner: Mutex<LinkInner>,
    outbound: OutboundHandle,
    status: Arc<StatusBoard>,
}

impl LinkSupervisor {
    pub fn new(config: LinkConfig, outbound: OutboundHandle, status: Arc<StatusBoard>) -> Self {
        Metrics::link_state_set(ConnectionState::Disconnected);
        Metrics::link_desired(false);
        Self {
            config,
            inner: Mutex::new(LinkInner {
                desired: false,
                state: ConnectionState::Disconnected,
                last_ack: Instant::now(),
                tasks: None,
            }),
            outbound,
            status,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connection_desired(&self) -> bool {
        self.inner.lock().desired
    }

    pub fn last_ack(&self) -> Instant {
        self.inner.lock().last_ack
    }

    pub fn tasks_running(&self) -> bool {
        self.inner.lock().tasks.is_some()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let inner = self.inner.lock();
        LinkSnapshot {
            state: inner.state,
            desired: inner.desired,
            ms_since_last_ack: inner.last_ack.elapsed().as_millis() as u64,
            tasks_running: inner.tasks.is_some(),
        }
    }

    /// Operator asked to connect.
    ///
    /// Must be called from within a Tokio runtime (spawns the periodic tasks).
    ///
    /// # Errors
    ///
    /// `LinkError::QueueClosed` if `PING_STATUS` cannot be queued.
    pub fn connect(self: &Arc<Self>) -> LinkResult<()> {
        let requested = {
            let mut inner = self.inner.lock();
            inner.desired = true;
            inner.last_ack = Instant::now();
            if inner.state == ConnectionState::Disconnected {
                self.transition(&mut inner, ConnectionState::Connecting);
            }
            // Queued before the heartbeat exists, so it is always first.
            let requested = self.request_status();
            self.restart_tasks(&mut inner);
            requested
        };
        Metrics::link_desired(true);
        info!("Connect requested");
        self.status.post("Connecting...");
        requested
    }

    /// Operator asked to disconnect. Idempotent.
    pub fn disconnect(&self) {
        {
            let mut inner = self.inner.lock();
            inner.desired = false;
            Self::cancel_tasks(&mut inner);
            self.transition(&mut inner, ConnectionState::Disconnected);
        }
        Metrics::link_desired(false);
        info!("Disconnect requested");
        self.status.post("Connection closed");
    }

    /// Application backgrounded: stop the periodic tasks, keep the intent.
    pub fn suspend(&self) {
        let mut inner = self.inner.lock();
        if inner.desired {
            Self::cancel_tasks(&mut inner);
            info!("Link supervision suspended");
        }
    }

    /// Application foregrounded: restart supervision if a connection is
    /// wanted.
    ///
    /// # Errors
    ///
    /// `LinkError::QueueClosed` if `PING_STATUS` cannot be queued.
    pub fn resume(self: &Arc<Self>) -> LinkResult<()> {
        let requested = {
            let mut inner = self.inner.lock();
            if !inner.desired {
                debug!("Resume without connection intent, nothing to do");
                return Ok(());
            }
            inner.last_ack = Instant::now();
            if inner.state != ConnectionState::Connected {
                self.transition(&mut inner, ConnectionState::Connecting);
            }
            let requested = self.request_status();
            self.restart_tasks(&mut inner);
            requested
        };
        info!("Link supervision resumed");
        self.status.post("Reactivating connection...");
        requested
    }

    /// Record an ACK line. Promotes to Connected only while a connection is
    /// wanted; otherwise the line is only reported.
    pub fn record_ack(&self, line: &str) {
        self.status.post(format!("ACK: {line}"));
        let mut inner = self.inner.lock();
        if !inner.desired {
            debug!(%line, "ACK ignored, no connection requested");
            return;
        }
        inner.last_ack = Instant::now();
        if inner.state != ConnectionState::Connected {
            info!(%line, "Link connected");
        }
        self.transition(&mut inner, ConnectionState::Connected);
    }

    /// Watchdog check at `now`. Returns `true` if the link was demoted.
    pub fn check_watchdog(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return false;
        }
        let age = now.saturating_duration_since(inner.last_ack);
        if age <= self.config.watchdog_timeout {
            return false;
        }
        self.transition(&mut inner, ConnectionState::Disconnected);
        drop(inner);

        warn!(age_ms = age.as_millis() as u64, "Link lost, no ACK within timeout");
        Metrics::watchdog_timeout();
        self.status.post("Connection lost");
        true
    }

    fn request_status(&self) -> LinkResult<()> {
        self.outbound.send(Command::System(SystemCommand::PingStatus))
    }

    fn transition(&self, inner: &mut LinkInner, next: ConnectionState) {
        if inner.state != next {
            debug!(from = ?inner.state, to = ?next, "Link state change");
            inner.state = next;
            Metrics::link_state_set(next);
        }
    }

    fn cancel_tasks(inner: &mut LinkInner) {
        if let Some(token) = inner.tasks.take() {
            token.cancel();
            debug!("Heartbeat and watchdog cancelled");
        }
    }

    /// Cancel any running pair, then spawn a fresh heartbeat and watchdog.
    fn restart_tasks(self: &Arc<Self>, inner: &mut LinkInner) {
        Self::cancel_tasks(inner);
        let token = CancellationToken::new();
        tokio::spawn(heartbeat_loop(
            Arc::downgrade(self),
            self.config.heartbeat_interval,
            token.clone(),
        ));
        tokio::spawn(watchdog_loop(
            Arc::downgrade(self),
            self.config.watchdog_period,
            token.clone(),
        ));
        inner.tasks = Some(token);
    }
}

impl AckHandler for LinkSupervisor {
    fn on_ack(&self, line: &str) {
        self.record_ack(line);
    }
}

impl Drop for LinkSupervisor {
    fn drop(&mut self) {
        Self::cancel_tasks(self.inner.get_mut());
    }
}

/// Broadcast `HEARTBEAT` every `period`, first tick immediately.
async fn heartbeat_loop(
    supervisor: Weak<LinkSupervisor>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(supervisor) = supervisor.upgrade() else { break };
                if let Err(e) = supervisor
                    .outbound
                    .send(Command::System(SystemCommand::Heartbeat))
                {
                    warn!(error = %e, "Heartbeat could not be queued, stopping");
                    break;
                }
            }
        }
    }
    debug!("Heartbeat task exited");
}

/// Run the staleness check every `period`.
async fn watchdog_loop(
    supervisor: Weak<LinkSupervisor>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(supervisor) = supervisor.upgrade() else { break };
                supervisor.check_watchdog(Instant::now());
            }
        }
    }
    debug!("Watchdog task exited");
}
