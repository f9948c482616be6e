//! Emergency-stop interlock.
//!
//! While engaged, block commands update the store but are not forwarded to
//! the layout. Switch commands are never gated.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Interlock flag with the time of its last change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interlock {
    engaged: bool,
    changed_at: DateTime<Utc>,
}

impl Interlock {
    pub fn new(engaged: bool) -> Self {
        Self {
            engaged,
            changed_at: Utc::now(),
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    /// Whether block commands may reach the layout.
    pub fn forwards_blocks(&self) -> bool {
        !self.engaged
    }

    /// Set the flag. Returns `false` if it already had that value.
    pub fn set(&mut self, engaged: bool) -> bool {
        if self.engaged == engaged {
            return false;
        }
        self.engaged = engaged;
        self.changed_at = Utc::now();
        true
    }
}
