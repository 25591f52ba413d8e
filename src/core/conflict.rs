//! Layer 7: Pre-commit conflict detection
//!
//! A writer checks its update against changes that landed after its base
//! revision before committing. A detected conflict is an expected outcome;
//! the caller retries or aborts.

use super::document::NodeDocument;
use super::error::ConflictDetected;
use super::keys;
use super::revision::Revision;
use super::update::{Operation, UpdateOp};
use super::vector::RevisionVector;
use crate::store::{DocumentStore, StoreError};

impl NodeDocument {
    /// Whether `op` conflicts with changes on this document that happened
    /// after `base`. `commit` is the revision the update will commit at.
    pub fn is_conflicting(
        &self,
        store: &dyn DocumentStore,
        op: &UpdateOp,
        base: &RevisionVector,
        commit: &Revision,
        enable_concurrent_add_remove: bool,
    ) -> Result<bool, StoreError> {
        Ok(self
            .first_conflicting(store, op, base, commit, enable_concurrent_add_remove)?
            .is_some())
    }

    /// Like [`is_conflicting`](Self::is_conflicting), but raises
    /// [`ConflictDetected`] carrying the offending revision.
    pub fn check_conflict(
        &self,
        store: &dyn DocumentStore,
        op: &UpdateOp,
        base: &RevisionVector,
        commit: &Revision,
        enable_concurrent_add_remove: bool,
    ) -> crate::Result<()> {
        if let Some(conflict) =
            self.first_conflicting(store, op, base, commit, enable_concurrent_add_remove)?
        {
            return Err(ConflictDetected {
                commit: *commit,
                conflict,
            }
            .into());
        }
        Ok(())
    }

    fn first_conflicting(
        &self,
        store: &dyn DocumentStore,
        op: &UpdateOp,
        base: &RevisionVector,
        commit: &Revision,
        enable_concurrent_add_remove: bool,
    ) -> Result<Option<Revision>, StoreError> {
        let allow_delete_change =
            enable_concurrent_add_remove && self.allow_conflicting_delete_change(op);

        // did the existence of the node change after base? the local
        // deleted map holds the most recent entries
        for (rev, value) in self.local_deleted().iter().rev() {
            if rev == commit {
                continue;
            }
            if base.is_revision_newer(rev) {
                let newer_deleted = value == "true";
                if !allow_delete_change || op.is_delete() != newer_deleted {
                    return Ok(Some(*rev));
                }
            }
        }

        for (key, change) in op.changes() {
            if !matches!(change, Operation::SetMapEntry(_)) {
                continue;
            }
            let name = key.name();
            if name == keys::DELETED && !allow_delete_change {
                // existence of the node changed, this conflicts with any
                // other concurrent change
                let witness = self
                    .local_deleted()
                    .keys()
                    .rev()
                    .find(|r| *r != commit)
                    .copied()
                    .unwrap_or(*commit);
                return Ok(Some(witness));
            }
            if !keys::is_property_name(name) {
                continue;
            }
            // was this property touched after base?
            for rev in self.get_changes(store, name, base)? {
                let rev = rev?;
                if rev == *commit {
                    continue;
                }
                if base.is_revision_newer(&rev) {
                    return Ok(Some(rev));
                }
            }
        }
        Ok(None)
    }

    /// The concurrent-add-remove exception: conflicting `_deleted` changes
    /// are tolerated only on hidden paths, for pure add or pure delete
    /// operations, when neither the operation nor the document carries any
    /// user-visible property.
    fn allow_conflicting_delete_change(&self, op: &UpdateOp) -> bool {
        let hidden = self
            .main_path()
            .map(|p| p.is_hidden())
            .unwrap_or(false);
        if !hidden {
            return false;
        }
        if !op.is_new() && !op.is_delete() {
            return false;
        }
        if op.changes().keys().any(|k| keys::is_property_name(k.name())) {
            return false;
        }
        // remotely updated properties leave an entry by the time conflicts
        // are checked; the local key set is enough
        if self.keys().any(keys::is_property_name) {
            return false;
        }
        true
    }
}
