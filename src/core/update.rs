//! Layer 4: Update operations
//!
//! The typed vocabulary a writer emits against a document. The external
//! store applies an `UpdateOp` atomically with conditional map-level
//! semantics; the in-memory document instance is invalidated, never mutated.

use std::collections::BTreeMap;
use std::fmt;

use super::commit::CommitValue;
use super::keys;
use super::path::DocId;
use super::range::Range;
use super::revision::Revision;

/// A scalar system value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scalar {
    Bool(bool),
    Long(i64),
    String(String),
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Long(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(v.to_string())
    }
}

/// Address of one change: a document key, optionally narrowed to one
/// revision entry of a revision-keyed map.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    name: String,
    revision: Option<Revision>,
}

impl Key {
    pub fn new(name: impl Into<String>, revision: Option<Revision>) -> Self {
        Self {
            name: name.into(),
            revision,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{}.{}", self.name, rev),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One change within an `UpdateOp`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Write a scalar system field.
    Set(Scalar),
    /// Set the field to `max(existing, value)`.
    Max(i64),
    /// Add or replace one revision entry of a map.
    SetMapEntry(String),
    /// Delete one revision entry of a map.
    RemoveMapEntry,
    /// Tombstone one revision entry of a map. Distinct from remove for
    /// concurrent-commit ordering at real backends.
    UnsetMapEntry,
    /// Precondition: the entry must currently hold this value.
    Equals(String),
}

/// An atomic update against one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateOp {
    id: DocId,
    is_new: bool,
    is_delete: bool,
    changes: BTreeMap<Key, Operation>,
}

impl UpdateOp {
    /// An update of an existing document.
    pub fn new(id: DocId) -> Self {
        Self {
            id,
            is_new: false,
            is_delete: false,
            changes: BTreeMap::new(),
        }
    }

    /// An update that creates the document.
    pub fn new_document(id: DocId) -> Self {
        Self {
            is_new: true,
            ..Self::new(id)
        }
    }

    /// An update that marks the node deleted.
    pub fn new_delete(id: DocId) -> Self {
        Self {
            is_delete: true,
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> &DocId {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_delete(&self) -> bool {
        self.is_delete
    }

    pub fn changes(&self) -> &BTreeMap<Key, Operation> {
        &self.changes
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    //----------------------- raw operations ------------------------------

    pub fn set(&mut self, name: &str, value: impl Into<Scalar>) -> &mut Self {
        self.changes
            .insert(Key::new(name, None), Operation::Set(value.into()));
        self
    }

    pub fn max(&mut self, name: &str, value: i64) -> &mut Self {
        self.changes
            .insert(Key::new(name, None), Operation::Max(value));
        self
    }

    pub fn set_map_entry(&mut self, name: &str, revision: Revision, value: &str) -> &mut Self {
        self.changes.insert(
            Key::new(name, Some(revision)),
            Operation::SetMapEntry(value.to_string()),
        );
        self
    }

    pub fn remove_map_entry(&mut self, name: &str, revision: Revision) -> &mut Self {
        self.changes
            .insert(Key::new(name, Some(revision)), Operation::RemoveMapEntry);
        self
    }

    pub fn unset_map_entry(&mut self, name: &str, revision: Revision) -> &mut Self {
        self.changes
            .insert(Key::new(name, Some(revision)), Operation::UnsetMapEntry);
        self
    }

    pub fn equals(&mut self, name: &str, revision: Revision, value: &str) -> &mut Self {
        self.changes.insert(
            Key::new(name, Some(revision)),
            Operation::Equals(value.to_string()),
        );
        self
    }

    //----------------------- helper constructors -------------------------

    pub fn set_revision(&mut self, revision: Revision, commit_value: &CommitValue) -> &mut Self {
        self.set_map_entry(keys::REVISIONS, revision, &commit_value.to_string())
    }

    pub fn unset_revision(&mut self, revision: Revision) -> &mut Self {
        self.unset_map_entry(keys::REVISIONS, revision)
    }

    pub fn remove_revision(&mut self, revision: Revision) -> &mut Self {
        self.remove_map_entry(keys::REVISIONS, revision)
    }

    pub fn set_commit_root(&mut self, revision: Revision, depth: u32) -> &mut Self {
        self.set_map_entry(keys::COMMIT_ROOT, revision, &depth.to_string())
    }

    pub fn remove_commit_root(&mut self, revision: Revision) -> &mut Self {
        self.remove_map_entry(keys::COMMIT_ROOT, revision)
    }

    pub fn unset_commit_root(&mut self, revision: Revision) -> &mut Self {
        self.unset_map_entry(keys::COMMIT_ROOT, revision)
    }

    /// Record the node's existence state at `revision`. Deleting also sets
    /// `_deletedOnce`.
    pub fn set_deleted(&mut self, revision: Revision, deleted: bool) -> &mut Self {
        self.set_map_entry(
            keys::DELETED,
            revision,
            if deleted { "true" } else { "false" },
        );
        if deleted {
            self.set_deleted_once();
        }
        self
    }

    pub fn set_deleted_once(&mut self) -> &mut Self {
        self.set(keys::DELETED_ONCE, true)
    }

    pub fn remove_deleted(&mut self, revision: Revision) -> &mut Self {
        self.remove_map_entry(keys::DELETED, revision)
    }

    pub fn set_previous(&mut self, range: &Range) -> &mut Self {
        self.set_map_entry(keys::PREVIOUS, range.high, &range.entry_value())
    }

    pub fn remove_previous(&mut self, range: &Range) -> &mut Self {
        self.remove_previous_high(range.high)
    }

    pub fn remove_previous_high(&mut self, high: Revision) -> &mut Self {
        self.remove_map_entry(keys::PREVIOUS, high)
    }

    pub fn set_stale_previous(&mut self, high: Revision, height: u32) -> &mut Self {
        self.set_map_entry(keys::STALE_PREV, high, &height.to_string())
    }

    pub fn remove_stale_previous(&mut self, high: Revision) -> &mut Self {
        self.remove_map_entry(keys::STALE_PREV, high)
    }

    pub fn set_branch_commit(&mut self, revision: Revision) -> &mut Self {
        self.set_map_entry(keys::BRANCH_COMMITS, revision, "true")
    }

    pub fn remove_branch_commit(&mut self, revision: Revision) -> &mut Self {
        self.remove_map_entry(keys::BRANCH_COMMITS, revision)
    }

    pub fn set_has_binary(&mut self) -> &mut Self {
        self.set(keys::HAS_BINARY_FLAG, keys::HAS_BINARY_VAL)
    }

    pub fn set_children_flag(&mut self, has_child_node: bool) -> &mut Self {
        self.set(keys::CHILDREN_FLAG, has_child_node)
    }

    /// Record the writer's last modification under the `(0, 0, writer)`
    /// placeholder key.
    pub fn set_last_rev(&mut self, revision: Revision) -> &mut Self {
        self.set_map_entry(
            keys::LAST_REV,
            Revision::new_key(revision.writer_id()),
            &revision.to_string(),
        )
    }

    /// Precondition on the writer's current `_lastRev` entry.
    pub fn has_last_rev(&mut self, revision: Revision) -> &mut Self {
        self.equals(
            keys::LAST_REV,
            Revision::new_key(revision.writer_id()),
            &revision.to_string(),
        )
    }

    /// Record the writer's sweep revision under the `(0, 0, writer)`
    /// placeholder key.
    pub fn set_sweep_rev(&mut self, revision: Revision) -> &mut Self {
        self.set_map_entry(
            keys::SWEEP_REV,
            Revision::new_key(revision.writer_id()),
            &revision.to_string(),
        )
    }

    /// Advance `_modified`, floored to 5-second resolution.
    pub fn set_modified(&mut self, revision: Revision) -> &mut Self {
        self.max(
            keys::MODIFIED_IN_SECS,
            keys::modified_in_secs(revision.timestamp()),
        )
    }

    /// Leave a collision marker for `revision`, recorded by the commit
    /// `other` that detected it.
    pub fn add_collision(&mut self, revision: Revision, other: Revision) -> &mut Self {
        self.set_map_entry(keys::COLLISIONS, revision, &other.to_string())
    }

    pub fn remove_collision(&mut self, revision: Revision) -> &mut Self {
        self.remove_map_entry(keys::COLLISIONS, revision)
    }
}
