//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] slugsync_core::CoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] slugsync_registry::RegistryError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<slugsync_ws::WsError>),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] slugsync_telemetry::TelemetryError),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown requested")]
    Shutdown,
}

pub type AppResult<T> = Result<T, AppError>;
