//! Consumed collaborator interfaces.
//!
//! The persistent store and the commit log live outside this crate; the
//! read and write paths only consume the contracts below. The in-memory
//! store exists for tests and as the reference semantics of conditional
//! map-level updates.

pub mod cache;
pub mod memory;

use std::sync::Arc;

use thiserror::Error;

use crate::core::commit::CommitValue;
use crate::core::document::NodeDocument;
use crate::core::error::MalformedDocument;
use crate::core::path::{DocId, Path};
use crate::core::revision::{Revision, WriterId};
use crate::core::update::UpdateOp;
use crate::core::vector::RevisionVector;

pub use cache::PrevNoPropCache;
pub use memory::MemoryDocumentStore;

/// Errors surfaced by a document store. I/O failures pass through the core
/// unchanged; there is no intrinsic retry loop.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store backend failed: {reason}")]
    Backend { reason: String },

    #[error("stored document is corrupt: {source}")]
    Corrupt {
        #[from]
        source: MalformedDocument,
    },
}

impl StoreError {
    pub fn backend(reason: impl Into<String>) -> Self {
        StoreError::Backend {
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(source: MalformedDocument) -> Self {
        StoreError::Corrupt { source }
    }

    pub(crate) fn corrupt_msg(reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            source: MalformedDocument::new(reason),
        }
    }
}

/// An abstract key/value collection of node documents with conditional
/// map-level updates.
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id.
    fn find(&self, id: &DocId) -> Result<Option<Arc<NodeDocument>>, StoreError>;

    /// Apply `op` atomically and return the document as it was *before* the
    /// update. `Ok(None)` means the document did not exist (it was created
    /// when the op allows that) or a precondition failed and nothing was
    /// changed.
    fn find_and_update(&self, op: &UpdateOp) -> Result<Option<Arc<NodeDocument>>, StoreError>;

    /// The cached instance for `id`, without going to the backend.
    fn get_if_cached(&self, id: &DocId) -> Option<Arc<NodeDocument>>;

    /// Drop any cached instance for `id`.
    fn invalidate_cache(&self, id: &DocId);
}

/// An isolated lineage of commits sharing a base revision vector, merged
/// atomically or discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    base: RevisionVector,
    commits: Vec<Revision>,
}

impl Branch {
    /// A branch with the given (trunk) base and its branch-tagged commits.
    pub fn new(base: RevisionVector, commits: impl IntoIterator<Item = Revision>) -> Self {
        Self {
            base: base.base(),
            commits: commits.into_iter().map(|r| r.as_branch()).collect(),
        }
    }

    pub fn base(&self) -> &RevisionVector {
        &self.base
    }

    /// The base as seen by the given branch commit. All commits of a branch
    /// share the branch base.
    pub fn base_at(&self, _r: &Revision) -> &RevisionVector {
        &self.base
    }

    /// True when `r` is one of this branch's commits, regardless of the
    /// branch flag on `r`.
    pub fn contains_commit(&self, r: &Revision) -> bool {
        let r = r.as_branch();
        self.commits.contains(&r)
    }

    pub fn commits(&self) -> impl Iterator<Item = &Revision> {
        self.commits.iter()
    }
}

/// Registry of unmerged branches, resolving read revisions to their branch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Branches {
    branches: Vec<Branch>,
}

impl Branches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, branch: Branch) {
        self.branches.push(branch);
    }

    /// The branch a (branch-tagged) read revision belongs to, `None` for
    /// trunk reads and for branch revisions that merely reference the base
    /// of a branch not yet created.
    pub fn branch_of(&self, read: &RevisionVector) -> Option<&Branch> {
        let branch_rev = read.branch_revision()?;
        self.branches
            .iter()
            .find(|b| b.contains_commit(branch_rev))
    }
}

/// The per-request view a reader or writer operates under: its own writer
/// id, the current head, unmerged branches, and the commit-value oracle.
pub trait RevisionContext {
    /// The current head revision vector.
    fn head_revision(&self) -> RevisionVector;

    /// The writer id of this cluster member.
    fn writer_id(&self) -> WriterId;

    /// The unmerged branches created by this cluster member.
    fn branches(&self) -> &Branches;

    /// The commit value for a change on the given document, resolving the
    /// commit root where necessary. `None` means unknown, treated as
    /// uncommitted.
    fn commit_value(
        &self,
        revision: &Revision,
        doc: &NodeDocument,
    ) -> Result<Option<CommitValue>, StoreError>;

    /// A last-modified revision for the given path that is not yet
    /// reflected in the stored document, if any.
    fn pending_modification(&self, _path: &Path) -> Option<Revision> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(ts: u64, writer: WriterId) -> Revision {
        Revision::new(ts, 0, writer)
    }

    #[test]
    fn branch_contains_commit_ignores_branch_flag() {
        let base = RevisionVector::from_revisions([rev(1, 1)]);
        let branch = Branch::new(base, [rev(2, 1)]);
        assert!(branch.contains_commit(&rev(2, 1)));
        assert!(branch.contains_commit(&rev(2, 1).as_branch()));
        assert!(!branch.contains_commit(&rev(3, 1)));
    }

    #[test]
    fn branch_of_resolves_branch_reads_only() {
        let base = RevisionVector::from_revisions([rev(1, 1)]);
        let mut branches = Branches::new();
        branches.add(Branch::new(base.clone(), [rev(2, 1)]));

        let trunk_read = RevisionVector::from_revisions([rev(5, 1)]);
        assert!(branches.branch_of(&trunk_read).is_none());

        let branch_read = base.update(rev(2, 1).as_branch());
        assert!(branches.branch_of(&branch_read).is_some());

        let foreign = base.update(rev(9, 1).as_branch());
        assert!(branches.branch_of(&foreign).is_none());
    }
}
