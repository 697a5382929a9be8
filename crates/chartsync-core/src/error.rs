//! Error taxonomy for the registry core.

use thiserror::Error;

use crate::db::DbError;

/// Error taxonomy of the service surface. Transient sync failures are not
/// errors here: an attempt that reaches the registry and fails comes back
/// as a [`crate::sync::SyncReport`] carrying the fault, already audited.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Bad input shape or format; surfaced verbatim, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unique constraint violation; the caller must change input
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A sync attempt for this record is already running
    #[error("Sync already in flight for record {0}")]
    SyncInFlight(String),

    /// Capability check failed at the API boundary
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl<T> From<std::sync::PoisonError<T>> for RegistryError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        RegistryError::Internal(format!("Lock poisoned: {}", e))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
