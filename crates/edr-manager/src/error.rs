//! Errors of the EDR service and scheduler

use thiserror::Error;

use edr_core::EdrError;
use edr_refresh::RefreshError;

use crate::storage::StorageError;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Lifecycle(#[from] EdrError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

impl ServiceError {
    /// Whether the failure came from a concurrent write
    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Storage(StorageError::Conflict(_)))
    }
}
