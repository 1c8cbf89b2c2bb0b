//! Handler error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HandlerError {
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::Failed(detail.into())
    }

    /// Label for the handler failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Failed(_) | Self::Json(_) => "error",
            Self::Timeout(_) => "timeout",
            Self::Panicked(_) => "panic",
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;
