//! Core capability errors (parsing, validation, conflict outcomes).
//!
//! These are bounded and stable: core errors represent domain/refusal states,
//! not library implementation details.

use thiserror::Error;

use super::revision::Revision;

/// Revision string that does not parse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("revision `{raw}` is malformed: {reason}")]
pub struct MalformedRevision {
    pub raw: String,
    pub reason: &'static str,
}

/// Document text form that does not parse back into a node document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("document is malformed: {reason}")]
pub struct MalformedDocument {
    pub reason: String,
}

impl MalformedDocument {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// `_sdType` value that is not a number.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("split document type `{raw}` is not numeric")]
pub struct MalformedSplitType {
    pub raw: String,
}

/// `_sdType` code outside the known taxonomy. Fails fast.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("not a valid split document type code: {code}")]
pub struct InconsistentSplitType {
    pub code: i64,
}

/// Expected outcome of the pre-commit conflict check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("commit {commit} conflicts with concurrent change {conflict}")]
pub struct ConflictDetected {
    pub commit: Revision,
    pub conflict: Revision,
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    MalformedRevision(#[from] MalformedRevision),
    #[error(transparent)]
    MalformedDocument(#[from] MalformedDocument),
    #[error(transparent)]
    MalformedSplitType(#[from] MalformedSplitType),
    #[error(transparent)]
    InconsistentSplitType(#[from] InconsistentSplitType),
    #[error(transparent)]
    Conflict(#[from] ConflictDetected),
}
