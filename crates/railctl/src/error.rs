//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Link error: {0}")]
    Link(#[from] railctl_link::LinkError),

    #[error("Control error: {0}")]
    Control(#[from] railctl_control::ControlError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] railctl_telemetry::TelemetryError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
