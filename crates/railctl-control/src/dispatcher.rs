//! Command dispatcher and emergency-stop procedure.
//!
//! Rules:
//! - Switch commands: store updated, always forwarded.
//! - Block commands: store updated unconditionally, forwarded only while the
//!   emergency stop is released.
//! - Engaging the stop: `EMERGENCY_STOP_ON`, then one off-command per block
//!   stored active. The store keeps the operator's intent.
//! - Releasing the stop: `EMERGENCY_STOP_OFF`, then every stored block is
//!   resent with its stored value.
//!
//! The interlock lock is held from decision to enqueue, so the wire order
//! always matches the order in which decisions were made.

use crate::error::{ControlError, ControlResult};
use crate::interlock::Interlock;
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use railctl_core::{Command, ElementId, StatusBoard, SystemCommand};
use railctl_link::OutboundHandle;
use railctl_telemetry::Metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Point-in-time view for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlSnapshot {
    pub emergency_stop: bool,
    pub emergency_stop_changed_at: DateTime<Utc>,
    pub blocks: BTreeMap<String, bool>,
    pub switches: BTreeMap<String, bool>,
}

/// Command dispatcher. Sole writer of the state store and the interlock.
pub struct Dispatcher {
    store: StateStore,
    interlock: Mutex<Interlock>,
    outbound: OutboundHandle,
    status: Arc<StatusBoard>,
}

impl Dispatcher {
    pub fn new(
        outbound: OutboundHandle,
        status: Arc<StatusBoard>,
        start_in_emergency_stop: bool,
    ) -> Self {
        Metrics::emergency_stop(start_in_emergency_stop);
        Self {
            store: StateStore::new(),
            interlock: Mutex::new(Interlock::new(start_in_emergency_stop)),
            outbound,
            status,
        }
    }

    /// Read-only access to the state store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn is_emergency_stop_engaged(&self) -> bool {
        self.interlock.lock().is_engaged()
    }

    /// Handle a raw operator action such as `B0011` or `EMERGENCY_STOP_ON`.
    ///
    /// Returns the parsed command.
    ///
    /// # Errors
    ///
    /// - `ControlError::Protocol`: unparseable input; nothing is mutated or sent
    /// - `ControlError::Link`: the outbound queue is closed (the store keeps
    ///   the new value)
    pub fn handle_action(&self, raw: &str) -> ControlResult<Command> {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(e) => {
                let err = ControlError::from(e);
                self.reject(&err);
                return Err(err);
            }
        };
        self.dispatch(command.clone())?;
        Ok(command)
    }

    /// Flip an element relative to its stored value.
    ///
    /// Returns the command that was dispatched.
    pub fn toggle(&self, id: &ElementId) -> ControlResult<Command> {
        let interlock = self.interlock.lock();
        let command = Command::element(id.clone(), !self.store.get(id));
        self.apply_locked(&interlock, command.clone())?;
        Ok(command)
    }

    /// Forward a free-form operator command (e.g. `INITIALIZE`).
    pub fn send_operator(&self, text: &str) -> ControlResult<Command> {
        let command = match Command::operator(text) {
            Ok(command) => command,
            Err(e) => {
                let err = ControlError::from(e);
                self.reject(&err);
                return Err(err);
            }
        };
        self.dispatch(command.clone())?;
        Ok(command)
    }

    /// Dispatch an already-typed command.
    pub fn dispatch(&self, command: Command) -> ControlResult<()> {
        match command {
            Command::System(SystemCommand::EmergencyStopOn) => {
                self.set_emergency_stop(true).map(|_| ())
            }
            Command::System(SystemCommand::EmergencyStopOff) => {
                self.set_emergency_stop(false).map(|_| ())
            }
            command => {
                let interlock = self.interlock.lock();
                self.apply_locked(&interlock, command)
            }
        }
    }

    /// Toggle the emergency stop. Returns the new engaged value.
    pub fn toggle_emergency_stop(&self) -> ControlResult<bool> {
        let mut interlock = self.interlock.lock();
        let engage = !interlock.is_engaged();
        self.transition_locked(&mut interlock, engage)?;
        Ok(engage)
    }

    /// Engage (`true`) or release (`false`) the emergency stop.
    ///
    /// Returns `false` without sending anything if already in that state.
    pub fn set_emergency_stop(&self, engage: bool) -> ControlResult<bool> {
        let mut interlock = self.interlock.lock();
        if interlock.is_engaged() == engage {
            debug!(engage, "Emergency stop already in requested state");
            return Ok(false);
        }
        self.transition_locked(&mut interlock, engage)?;
        Ok(true)
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        let interlock = self.interlock.lock();
        let to_map = |entries: Vec<(ElementId, bool)>| {
            entries
                .into_iter()
                .map(|(id, value)| (String::from(id), value))
                .collect::<BTreeMap<_, _>>()
        };
        ControlSnapshot {
            emergency_stop: interlock.is_engaged(),
            emergency_stop_changed_at: interlock.changed_at(),
            blocks: to_map(self.store.blocks()),
            switches: to_map(self.store.switches()),
        }
    }

    /// Apply an element or plain system command. Caller holds the interlock.
    fn apply_locked(&self, interlock: &Interlock, command: Command) -> ControlResult<()> {
        match &command {
            Command::Block { id, state } => {
                self.store.set(id.clone(), *state);
                if !interlock.forwards_blocks() {
                    debug!(%id, state, "Block stored, held by emergency stop");
                    self.status.post(format!("Held: {command} (emergency stop)"));
                    return Ok(());
                }
            }
            Command::Switch { id, state } => {
                self.store.set(id.clone(), *state);
            }
            Command::System(_) => {}
        }
        self.outbound.send(command)?;
        Ok(())
    }

    /// Flip the interlock and queue the matching reconciliation sequence.
    fn transition_locked(&self, interlock: &mut Interlock, engage: bool) -> ControlResult<()> {
        interlock.set(engage);
        Metrics::emergency_stop(engage);

        if engage {
            self.outbound.send(Command::System(SystemCommand::EmergencyStopOn))?;
            let mut forced_off = 0usize;
            for (id, active) in self.store.blocks() {
                if active {
                    self.outbound.send(Command::Block { id, state: false })?;
                    forced_off += 1;
                }
            }
            warn!(forced_off, "Emergency stop engaged");
            self.status.post("SYSTEM STOPPED");
        } else {
            self.outbound.send(Command::System(SystemCommand::EmergencyStopOff))?;
            let blocks = self.store.blocks();
            let resent = blocks.len();
            for (id, state) in blocks {
                self.outbound.send(Command::Block { id, state })?;
            }
            info!(resent, "Emergency stop released, layout resynchronized");
            self.status.post("SYSTEM RUNNING");
        }
        Ok(())
    }

    fn reject(&self, err: &ControlError) {
        warn!(error = %err, "Command rejected");
        Metrics::command_rejected(err.reason());
        self.status.post(format!("Error: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railctl_link::{outbound_channel, OutboundReceiver};

    fn dispatcher(engaged: bool) -> (Dispatcher, OutboundReceiver) {
        let (handle, rx) = outbound_channel();
        (
            Dispatcher::new(handle, Arc::new(StatusBoard::default()), engaged),
            rx,
        )
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd.to_wire());
        }
        out
    }

    fn id(raw: &str) -> ElementId {
        ElementId::parse(raw).unwrap()
    }

    #[test]
    fn test_block_forwarded_when_running() {
        let (d, mut rx) = dispatcher(false);
        d.handle_action("B0011").unwrap();
        assert_eq!(drain(&mut rx), vec!["B0011"]);
        assert!(d.store().get(&id("B001")));
    }

    #[test]
    fn test_block_held_when_stopped() {
        let (d, mut rx) = dispatcher(true);
        d.handle_action("B0011").unwrap();
        assert!(drain(&mut rx).is_empty());
        assert!(d.store().get(&id("B001")));
    }

    #[test]
    fn test_switch_always_forwarded() {
        let (d, mut rx) = dispatcher(true);
        d.handle_action("W0020").unwrap();
        assert_eq!(drain(&mut rx), vec!["W0020"]);
        assert!(!d.store().get(&id("W002")));
        assert!(d.store().contains(&id("W002")));
    }

    #[test]
    fn test_unknown_namespace_no_mutation_no_send() {
        let (d, mut rx) = dispatcher(false);
        let err = d.handle_action("X0011").unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));
        assert_eq!(err.reason(), "unknown_namespace");
        assert!(drain(&mut rx).is_empty());
        assert!(d.store().is_empty());
    }

    #[test]
    fn test_toggle_uses_store_value() {
        let (d, mut rx) = dispatcher(false);
        let first = d.toggle(&id("B005")).unwrap();
        let second = d.toggle(&id("B005")).unwrap();
        assert_eq!(first.to_wire(), "B0051");
        assert_eq!(second.to_wire(), "B0050");
        assert_eq!(drain(&mut rx), vec!["B0051", "B0050"]);
        assert!(!d.store().get(&id("B005")));
    }

    #[test]
    fn test_engage_forces_active_blocks_off() {
        let (d, mut rx) = dispatcher(false);
        d.handle_action("B0011").unwrap();
        d.handle_action("B0020").unwrap();
        d.handle_action("B1011").unwrap();
        drain(&mut rx);

        assert!(d.toggle_emergency_stop().unwrap());
        assert_eq!(drain(&mut rx), vec!["EMERGENCY_STOP_ON", "B0010", "B1010"]);
        // Intent is preserved.
        assert!(d.store().get(&id("B001")));
        assert!(d.store().get(&id("B101")));
    }

    #[test]
    fn test_release_resends_every_block() {
        let (d, mut rx) = dispatcher(true);
        d.handle_action("B0011").unwrap();
        d.handle_action("B0020").unwrap();
        d.handle_action("W0011").unwrap();
        drain(&mut rx);

        assert!(!d.toggle_emergency_stop().unwrap());
        assert_eq!(drain(&mut rx), vec!["EMERGENCY_STOP_OFF", "B0011", "B0020"]);
    }

    #[test]
    fn test_system_keywords_route_through_interlock() {
        let (d, mut rx) = dispatcher(false);
        d.handle_action("B0011").unwrap();
        drain(&mut rx);

        d.handle_action("EMERGENCY_STOP_ON").unwrap();
        assert!(d.is_emergency_stop_engaged());
        assert_eq!(drain(&mut rx), vec!["EMERGENCY_STOP_ON", "B0010"]);

        // Already engaged: nothing sent.
        d.handle_action("EMERGENCY_STOP_ON").unwrap();
        assert!(drain(&mut rx).is_empty());

        d.handle_action("EMERGENCY_STOP_OFF").unwrap();
        assert_eq!(drain(&mut rx), vec!["EMERGENCY_STOP_OFF", "B0011"]);
    }

    #[test]
    fn test_operator_command_forwarded() {
        let (d, mut rx) = dispatcher(true);
        d.send_operator("INITIALIZE").unwrap();
        assert_eq!(drain(&mut rx), vec!["INITIALIZE"]);
        assert!(d.send_operator("").is_err());
    }

    #[test]
    fn test_closed_queue_keeps_optimistic_state() {
        let (d, rx) = dispatcher(false);
        drop(rx);
        let err = d.handle_action("B0011").unwrap_err();
        assert!(matches!(err, ControlError::Link(_)));
        assert!(d.store().get(&id("B001")));
    }

    #[test]
    fn test_snapshot() {
        let (d, _rx) = dispatcher(true);
        d.handle_action("B0011").unwrap();
        d.handle_action("W011").unwrap();
        let snap = d.snapshot();
        assert!(snap.emergency_stop);
        assert_eq!(snap.blocks.get("B001"), Some(&true));
        assert_eq!(snap.switches.get("W01"), Some(&true));
    }
}
