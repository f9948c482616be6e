//! Operator-facing status line.
//!
//! Only the most recent event is kept; each new event overwrites the
//! previous one.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// A single status event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Shared last-event status board.
///
/// Thread-safe: share via `Arc<StatusBoard>`.
#[derive(Debug)]
pub struct StatusBoard {
    current: RwLock<StatusEvent>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new("Waiting for initialization...")
    }
}

impl StatusBoard {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(StatusEvent {
                message: initial.into(),
                at: Utc::now(),
            }),
        }
    }

    /// Replace the current status.
    pub fn post(&self, message: impl Into<String>) {
        *self.current.write() = StatusEvent {
            message: message.into(),
            at: Utc::now(),
        };
    }

    pub fn current(&self) -> StatusEvent {
        self.current.read().clone()
    }

    pub fn message(&self) -> String {
        self.current.read().message.clone()
    }
}
