//! Prometheus metrics for railctl.
//!
//! Covers:
//! - Link state machine
//! - Outbound datagrams (sent / failed, by command kind)
//! - Inbound ACKs (accepted / malformed) and listener restarts
//! - Emergency stop interlock
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter, CounterVec,
    Encoder, Gauge, GaugeVec, IntCounter, TextEncoder,
};
use railctl_core::ConnectionState;

/// Link state machine current state.
/// Labels: state (disconnected/connecting/connected)
pub static LINK_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "railctl_link_state",
        "Link state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Operator connection intent (1 = wants connection).
pub static LINK_DESIRED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "railctl_link_desired",
        "Operator connection intent (1=connect requested)"
    )
    .unwrap()
});

/// Watchdog demotions Connected -> Disconnected.
pub static WATCHDOG_TIMEOUT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "railctl_watchdog_timeout_total",
        "Total watchdog demotions due to stale ACKs"
    )
    .unwrap()
});

/// Datagrams handed to the network.
pub static DATAGRAMS_SENT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "railctl_datagrams_sent_total",
        "Total UDP datagrams sent",
        &["kind"]
    )
    .unwrap()
});

/// Datagrams that failed to send (not retried).
pub static DATAGRAMS_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "railctl_datagrams_failed_total",
        "Total UDP datagrams that failed to send",
        &["kind"]
    )
    .unwrap()
});

/// ACK lines accepted.
pub static ACKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("railctl_acks_total", "Total ACK lines received").unwrap()
});

/// ACK connections rejected as malformed.
pub static ACKS_MALFORMED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "railctl_acks_malformed_total",
        "Total ACK connections rejected as malformed"
    )
    .unwrap()
});

/// ACK listener restarts after a failure.
pub static LISTENER_RESTARTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "railctl_ack_listener_restarts_total",
        "Total ACK listener restarts after failure"
    )
    .unwrap()
});

/// Emergency stop engaged (1) or released (0).
pub static EMERGENCY_STOP: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "railctl_emergency_stop",
        "Emergency stop interlock (1=engaged)"
    )
    .unwrap()
});

/// Commands rejected by the parser.
pub static COMMANDS_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "railctl_commands_rejected_total",
        "Total commands rejected by the parser",
        &["reason"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set link state. Only the active state is 1, all others 0.
    pub fn link_state_set(state: ConnectionState) {
        for s in ConnectionState::ALL {
            LINK_STATE.with_label_values(&[s.as_str()]).set(0.0);
        }
        LINK_STATE.with_label_values(&[state.as_str()]).set(1.0);
    }

    pub fn link_desired(desired: bool) {
        LINK_DESIRED.set(if desired { 1.0 } else { 0.0 });
    }

    pub fn watchdog_timeout() {
        WATCHDOG_TIMEOUT_TOTAL.inc();
    }

    pub fn datagram_sent(kind: &str) {
        DATAGRAMS_SENT_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn datagram_failed(kind: &str) {
        DATAGRAMS_FAILED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn ack_received() {
        ACKS_TOTAL.inc();
    }

    pub fn ack_malformed() {
        ACKS_MALFORMED_TOTAL.inc();
    }

    pub fn listener_restart() {
        LISTENER_RESTARTS_TOTAL.inc();
    }

    pub fn emergency_stop(engaged: bool) {
        EMERGENCY_STOP.set(if engaged { 1.0 } else { 0.0 });
    }

    pub fn command_rejected(reason: &str) {
        COMMANDS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
