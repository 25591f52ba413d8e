//! Core domain types for versioned node documents
//!
//! Module hierarchy follows type dependency order:
//! - revision: Revision, WriterId (Layer 0)
//! - vector: RevisionVector (Layer 1)
//! - commit: CommitValue (Layer 2)
//! - path: Path, DocId (Layer 2)
//! - range: Range, PreviousIndex (Layer 3)
//! - update: UpdateOp vocabulary (Layer 4)
//! - document: NodeDocument record (Layer 5)
//! - codec: document text form (Layer 5)
//! - value_map: merged history views (Layer 6)
//! - visibility: read-side resolution (Layer 7)
//! - conflict / newest: write-side checks (Layer 7)
//! - split: history pruning (Layer 8)

pub mod codec;
pub mod commit;
pub mod conflict;
pub mod document;
pub mod error;
pub mod keys;
pub mod newest;
pub mod path;
pub mod range;
pub mod revision;
pub mod silencer;
pub mod split;
pub mod state;
pub mod update;
pub mod value_map;
pub mod vector;
pub mod visibility;

pub use commit::CommitValue;
pub use document::{DocValue, NodeDocument, RevisionMap, SplitDocType};
pub use error::{
    ConflictDetected, CoreError, InconsistentSplitType, MalformedDocument, MalformedRevision,
    MalformedSplitType,
};
pub use path::{DocId, Path};
pub use range::{PreviousIndex, Range};
pub use revision::{Revision, WriterId};
pub use state::NodeState;
pub use update::{Key, Operation, Scalar, UpdateOp};
pub use value_map::ValueMap;
pub use vector::RevisionVector;
pub use visibility::{is_visible, LastRevs, ResolvedValue, ValidRevisions};
