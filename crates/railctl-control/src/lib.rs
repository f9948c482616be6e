//! Control logic for the railctl layout controller.
//!
//! - `StateStore`: Authoritative element id -> bool map (blocks and switches)
//! - `Interlock`: Emergency-stop flag gating block commands
//! - `Dispatcher`: Parses operator actions, applies the interlock, mutates
//!   the store and queues outbound commands in decision order

pub mod dispatcher;
pub mod error;
pub mod interlock;
pub mod store;

pub use dispatcher::{ControlSnapshot, Dispatcher};
pub use error::{ControlError, ControlResult};
pub use interlock::Interlock;
pub use store::StateStore;
