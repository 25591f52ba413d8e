#![forbid(unsafe_code)]

pub mod core;
pub mod error;
pub mod store;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    is_visible, CommitValue, ConflictDetected, CoreError, DocId, DocValue, InconsistentSplitType,
    LastRevs, MalformedDocument, MalformedRevision, MalformedSplitType, NodeDocument, NodeState,
    Operation, Path, PreviousIndex, Range, ResolvedValue, Revision, RevisionMap, RevisionVector,
    Scalar, SplitDocType, UpdateOp, ValidRevisions, ValueMap, WriterId,
};
pub use crate::store::{
    Branch, Branches, DocumentStore, MemoryDocumentStore, PrevNoPropCache, RevisionContext,
    StoreError,
};
