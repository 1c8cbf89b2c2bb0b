//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Backing store could not be reached. The mutation may not have applied.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Backend(String),

    #[error("Invalid data: {0}")]
    Core(#[from] slugsync_core::CoreError),
}

impl RegistryError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
