//! railctl layout controller.
//!
//! Wires the components together and exposes them to the operator:
//! - TOML configuration with the layout catalogue
//! - Controller owning the dispatcher, link supervisor and transport tasks
//! - Line-oriented operator console

pub mod app;
pub mod config;
pub mod console;
pub mod error;

pub use app::{Controller, ControllerSnapshot};
pub use config::AppConfig;
pub use console::ConsoleCommand;
pub use error::{AppError, AppResult};
