//! Core domain types for the railctl layout controller.
//!
//! This crate provides the types shared by every other railctl crate:
//! - `ElementId`, `ElementKind`: Addressable track elements (blocks, switches)
//! - `Command`, `SystemCommand`: Typed commands and their ASCII wire form
//! - `ConnectionState`: Link state machine states
//! - `StatusBoard`: Last-event status line shown to the operator

pub mod command;
pub mod element;
pub mod error;
pub mod state;
pub mod status;

pub use command::{Command, SystemCommand};
pub use element::{ElementId, ElementKind};
pub use error::{ProtocolError, ProtocolResult};
pub use state::ConnectionState;
pub use status::{StatusBoard, StatusEvent};
