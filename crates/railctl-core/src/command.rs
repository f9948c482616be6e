//! Typed layout commands and their ASCII wire encoding.
//!
//! Wire format (one UDP datagram per command):
//! - `<ElementId><'0'|'1'>`, e.g. `B0011` (block B001 on), `W0020` (switch W002 curved)
//! - `EMERGENCY_STOP_ON`, `EMERGENCY_STOP_OFF`, `PING_STATUS`, `HEARTBEAT`
//! - free-form operator commands such as `INITIALIZE`

use crate::element::{ElementId, ElementKind};
use crate::error::{ProtocolError, ProtocolResult};
use std::fmt;

/// Link- and system-level commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemCommand {
    /// Layout must cut power to every output.
    EmergencyStopOn,
    /// Layout may resume normal operation.
    EmergencyStopOff,
    /// Status request sent on connect/resume.
    PingStatus,
    /// Periodic keep-alive.
    Heartbeat,
    /// Free-form operator command, forwarded verbatim.
    Operator(String),
}

impl SystemCommand {
    pub const EMERGENCY_STOP_ON: &'static str = "EMERGENCY_STOP_ON";
    pub const EMERGENCY_STOP_OFF: &'static str = "EMERGENCY_STOP_OFF";
    pub const PING_STATUS: &'static str = "PING_STATUS";
    pub const HEARTBEAT: &'static str = "HEARTBEAT";

    /// Match one of the reserved keywords. Operator commands never match.
    pub fn from_keyword(raw: &str) -> Option<Self> {
        match raw {
            Self::EMERGENCY_STOP_ON => Some(Self::EmergencyStopOn),
            Self::EMERGENCY_STOP_OFF => Some(Self::EmergencyStopOff),
            Self::PING_STATUS => Some(Self::PingStatus),
            Self::HEARTBEAT => Some(Self::Heartbeat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::EmergencyStopOn => Self::EMERGENCY_STOP_ON,
            Self::EmergencyStopOff => Self::EMERGENCY_STOP_OFF,
            Self::PingStatus => Self::PING_STATUS,
            Self::Heartbeat => Self::HEARTBEAT,
            Self::Operator(text) => text.as_str(),
        }
    }
}

/// A parsed command.
///
/// Element commands always carry an explicit target state; toggling is
/// resolved against the state store before a command is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set a block active (`true`) or inactive (`false`).
    Block { id: ElementId, state: bool },
    /// Set a switch straight (`true`) or curved (`false`).
    Switch { id: ElementId, state: bool },
    /// Non-element command.
    System(SystemCommand),
}

impl Command {
    /// Parse a raw action string.
    ///
    /// Reserved system keywords are recognised first; everything else must be
    /// `<prefix><digits><0|1>`.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        if let Some(system) = SystemCommand::from_keyword(raw) {
            return Ok(Self::System(system));
        }

        let (id_part, state) = match raw.as_bytes().last() {
            Some(b'1') => (&raw[..raw.len() - 1], true),
            Some(b'0') => (&raw[..raw.len() - 1], false),
            Some(_) => {
                // An unknown prefix outranks a bad state suffix.
                if let Some(prefix) = raw.chars().next() {
                    if ElementKind::from_prefix(prefix).is_none() {
                        return Err(ProtocolError::UnknownElementNamespace {
                            prefix,
                            raw: raw.to_string(),
                        });
                    }
                }
                return Err(ProtocolError::MalformedCommand {
                    raw: raw.to_string(),
                    reason: "target state must be '0' or '1'",
                });
            }
            None => {
                return Err(ProtocolError::MalformedCommand {
                    raw: raw.to_string(),
                    reason: "empty command",
                })
            }
        };

        let id = ElementId::parse(id_part).map_err(|e| match e {
            ProtocolError::UnknownElementNamespace { prefix, .. } => {
                ProtocolError::UnknownElementNamespace {
                    prefix,
                    raw: raw.to_string(),
                }
            }
            ProtocolError::MalformedCommand { reason, .. } => ProtocolError::MalformedCommand {
                raw: raw.to_string(),
                reason,
            },
            other => other,
        })?;

        Ok(Self::element(id, state))
    }

    /// Build an element command of the right variant for `id`.
    pub fn element(id: ElementId, state: bool) -> Self {
        match id.kind() {
            ElementKind::Block => Self::Block { id, state },
            ElementKind::Switch => Self::Switch { id, state },
        }
    }

    /// Build a free-form operator command.
    ///
    /// Rejects empty text, whitespace and control characters, and the
    /// reserved keywords (use the typed variants for those).
    pub fn operator(text: &str) -> ProtocolResult<Self> {
        let valid = !text.is_empty()
            && text.chars().all(|c| c.is_ascii_graphic())
            && SystemCommand::from_keyword(text).is_none();
        if !valid {
            return Err(ProtocolError::InvalidOperatorCommand(text.to_string()));
        }
        Ok(Self::System(SystemCommand::Operator(text.to_string())))
    }

    /// ASCII payload sent on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Block { id, state } | Self::Switch { id, state } => {
                format!("{}{}", id, if *state { '1' } else { '0' })
            }
            Self::System(system) => system.as_str().to_string(),
        }
    }

    /// Element targeted by this command, if any.
    pub fn element_id(&self) -> Option<&ElementId> {
        match self {
            Self::Block { id, .. } | Self::Switch { id, .. } => Some(id),
            Self::System(_) => None,
        }
    }

    /// Short label used for metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Block { .. } => "block",
            Self::Switch { .. } => "switch",
            Self::System(SystemCommand::Heartbeat) => "heartbeat",
            Self::System(SystemCommand::PingStatus) => "ping",
            Self::System(SystemCommand::EmergencyStopOn | SystemCommand::EmergencyStopOff) => {
                "emergency_stop"
            }
            Self::System(SystemCommand::Operator(_)) => "operator",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}
