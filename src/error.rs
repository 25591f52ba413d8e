use thiserror::Error;

use crate::core::{ConflictDetected, CoreError};
use crate::store::StoreError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the canonical capability
/// errors so callers can hold a single type across the read and write paths.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// True when the error is the expected outcome of a pre-commit conflict
    /// check. Callers retry or abort the transaction; the crate itself never
    /// retries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Core(CoreError::Conflict(_)))
    }
}

impl From<ConflictDetected> for Error {
    fn from(e: ConflictDetected) -> Self {
        Error::Core(CoreError::Conflict(e))
    }
}
