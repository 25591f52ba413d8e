//! Layer 7: Read-side visibility
//!
//! Decides, for a read point, which revisions are visible and what the
//! current value of a property is. This is the heart of read-side
//! correctness; everything here walks revision maps newest-first and stops
//! at the first visible hit.

use std::collections::{BTreeMap, HashMap};

use super::commit::CommitValue;
use super::document::NodeDocument;
use super::keys;
use super::revision::{Revision, WriterId};
use super::state::NodeState;
use super::vector::RevisionVector;
use crate::store::{Branch, DocumentStore, PrevNoPropCache, RevisionContext, StoreError};

/// Caller-scoped cache of revisions already proven visible from the current
/// read point, mapped to their commit value.
pub type ValidRevisions = HashMap<Revision, CommitValue>;

/// A resolved property value: the map entry that produced it and the
/// commit revision it became visible at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedValue {
    /// The revision the change was committed at (merge revision for merged
    /// branch changes, branch-tagged for unmerged ones).
    pub commit_revision: Revision,
    /// The map key of the entry.
    pub revision: Revision,
    /// The stored value; the empty string marks a removed property.
    pub value: String,
}

/// Tracks the most recent modifications observed while resolving a read,
/// seeded from the document's `_lastRev` entries.
#[derive(Clone, Debug, Default)]
pub struct LastRevs {
    revs: BTreeMap<WriterId, Revision>,
    branch_rev: Option<Revision>,
}

impl LastRevs {
    pub fn new(seed: BTreeMap<WriterId, Revision>) -> Self {
        Self {
            revs: seed,
            branch_rev: None,
        }
    }

    /// Keep the newest revision per writer.
    pub fn update(&mut self, r: Revision) {
        self.revs
            .entry(r.writer_id())
            .and_modify(|cur| {
                if cur.stable_cmp(&r).is_lt() {
                    *cur = r;
                }
            })
            .or_insert(r);
    }

    /// Keep the newest branch revision seen.
    pub fn update_branch(&mut self, r: Revision) {
        let r = r.as_branch();
        match self.branch_rev {
            Some(cur) if cur.stable_cmp(&r).is_ge() => {}
            _ => self.branch_rev = Some(r),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revs.values()
    }

    pub fn branch_revision(&self) -> Option<&Revision> {
        self.branch_rev.as_ref()
    }
}

/// Whether a revision with the given commit value is visible from `read`.
///
/// Committed changes are visible when their resolved commit revision is
/// covered by the read vector (or by the branch base for branch reads).
/// Unmerged branch changes are visible only to reads on the very same
/// branch of the local writer.
pub fn is_visible(
    ctx: &dyn RevisionContext,
    revision: &Revision,
    commit_value: &CommitValue,
    read: &RevisionVector,
) -> bool {
    if commit_value.is_committed() {
        let resolved = commit_value.resolve_commit_revision(*revision);
        match ctx.branches().branch_of(read) {
            // read is not a branch read; a branch revision merely
            // referencing the base of a not-yet-created branch reads as
            // trunk
            None => !read.is_revision_newer(&resolved),
            Some(branch) => {
                let base = match read.branch_revision() {
                    Some(br) => branch.base_at(br),
                    None => branch.base(),
                };
                !base.is_revision_newer(&resolved)
            }
        }
    } else {
        let Some(base) = commit_value.branch_base() else {
            return false;
        };
        let local = base
            .branch_revision()
            .map(|r| r.writer_id() == ctx.writer_id())
            .unwrap_or(false);
        if !local {
            // an unmerged branch commit of another writer, never visible
            return false;
        }
        match ctx.branches().branch_of(read) {
            // reading on trunk never sees changes of an unmerged branch
            None => false,
            Some(branch) if branch.contains_commit(revision) => {
                !read.is_revision_newer(revision)
            }
            // a different branch
            Some(_) => false,
        }
    }
}

impl NodeDocument {
    /// Whether `revision` is committed and visible from `read`, caching the
    /// proven commit value in `valid`.
    pub fn is_valid_revision(
        &self,
        ctx: &dyn RevisionContext,
        revision: &Revision,
        commit_value: Option<CommitValue>,
        read: &RevisionVector,
        valid: &mut ValidRevisions,
    ) -> Result<bool, StoreError> {
        if valid.contains_key(revision) {
            return Ok(true);
        }
        let commit_value = match commit_value {
            Some(cv) => cv,
            None => match ctx.commit_value(revision, self)? {
                Some(cv) => cv,
                // not committed, hence not visible
                None => return Ok(false),
            },
        };
        if is_visible(ctx, revision, &commit_value, read) {
            valid.insert(*revision, commit_value);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// The latest entry of `seq` (a descending property sequence) visible
    /// from `read`. Skips entries whose revision is not visible; the first
    /// hit wins.
    pub fn latest_value(
        &self,
        ctx: &dyn RevisionContext,
        seq: impl Iterator<Item = Result<(Revision, String), StoreError>>,
        read: &RevisionVector,
        valid: &mut ValidRevisions,
        last_revs: &mut LastRevs,
    ) -> Result<Option<ResolvedValue>, StoreError> {
        for entry in seq {
            let (revision, value) = entry?;
            let commit_value = match valid.get(&revision).cloned() {
                Some(cv) => Some(cv),
                None => ctx.commit_value(&revision, self)?,
            };
            let Some(commit_value) = commit_value else {
                continue;
            };
            let commit_revision = commit_value.resolve_commit_revision(revision);
            if commit_value.is_committed() {
                last_revs.update(commit_revision);
            } else {
                last_revs.update_branch(commit_revision);
            }
            if self.is_valid_revision(ctx, &revision, Some(commit_value), read, valid)? {
                return Ok(Some(ResolvedValue {
                    commit_revision,
                    revision,
                    value,
                }));
            }
        }
        Ok(None)
    }

    /// Whether `revision` (assumed committed) is at least as recent as the
    /// first committed revision encountered walking `local` newest-first.
    pub fn is_most_recent_committed(
        &self,
        ctx: &dyn RevisionContext,
        local: &super::document::RevisionMap,
        revision: &Revision,
    ) -> Result<bool, StoreError> {
        let Some(newest) = local.keys().next_back() else {
            return Ok(true);
        };
        if newest.stable_cmp(revision).is_le() {
            return Ok(true);
        }
        for r in local.keys().rev() {
            let Some(cv) = ctx.commit_value(r, self)? else {
                continue;
            };
            if cv.is_committed() {
                let resolved = cv.resolve_commit_revision(*r);
                return Ok(resolved.stable_cmp(revision).is_le());
            }
        }
        // no committed revision in the map at all
        Ok(true)
    }

    /// Whether a hit from the local map alone is insufficient: the hit is
    /// not the most recent committed revision locally and some previous
    /// range reaches past it, so the full value map must be consulted.
    pub fn requires_complete_map_check(
        &self,
        ctx: &dyn RevisionContext,
        value: Option<&ResolvedValue>,
        local: &super::document::RevisionMap,
    ) -> Result<bool, StoreError> {
        let Some(value) = value else {
            return Ok(false);
        };
        if self.previous_ranges().is_empty()
            || self.is_most_recent_committed(ctx, local, &value.commit_revision)?
        {
            return Ok(false);
        }
        Ok(self
            .previous_ranges()
            .keys()
            .any(|high| high.stable_cmp(&value.commit_revision).is_gt()))
    }

    /// Whether any of the given revisions is committed at all, visible or
    /// not. Reads `valid` but does not extend it.
    fn any_revision_committed<'r>(
        &self,
        ctx: &dyn RevisionContext,
        revisions: impl Iterator<Item = &'r Revision>,
        valid: &ValidRevisions,
    ) -> Result<bool, StoreError> {
        for r in revisions {
            let cv = match valid.get(r).cloned() {
                Some(cv) => Some(cv),
                None => ctx.commit_value(r, self)?,
            };
            if cv.map(|cv| cv.is_committed()).unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The earliest commit revision at which the node was alive at or
    /// before `read`, or `None` when the node is deleted at that read
    /// point.
    pub fn live_revision(
        &self,
        ctx: &dyn RevisionContext,
        store: &dyn DocumentStore,
        read: &RevisionVector,
        valid: &mut ValidRevisions,
        last_revs: &mut LastRevs,
    ) -> Result<Option<Revision>, StoreError> {
        let local = self.local_deleted();
        let local_seq = local.iter().rev().map(|(r, v)| Ok((*r, v.clone())));
        let mut value = self.latest_value(ctx, local_seq, read, valid, last_revs)?;
        if self.requires_complete_map_check(ctx, value.as_ref(), local)? {
            value = None;
        }
        if value.is_none() && !self.previous_ranges().is_empty() {
            let full = self.deleted_map(store);
            value = self.latest_value(ctx, full.iter(), read, valid, last_revs)?;
        }
        Ok(value
            .filter(|v| v.value == "false")
            .map(|v| v.commit_revision))
    }

    /// The node as seen from `read`, or `None` when it does not exist at
    /// that read point.
    pub fn node_at_revision(
        &self,
        ctx: &dyn RevisionContext,
        store: &dyn DocumentStore,
        read: &RevisionVector,
        prev_no_prop: Option<&PrevNoPropCache>,
    ) -> Result<Option<NodeState>, StoreError> {
        let mut valid = ValidRevisions::new();
        let branch = ctx.branches().branch_of(read);
        let path = self.main_path().map_err(StoreError::corrupt)?;
        let pending = ctx.pending_modification(&path);
        let mut last_revs = self.create_last_revs(ctx, branch, pending)?;

        let Some(min) = self.live_revision(ctx, store, read, &mut valid, &mut last_revs)? else {
            // deleted
            return Ok(None);
        };

        let mut properties = BTreeMap::new();
        let names: Vec<String> = self.property_names().map(str::to_string).collect();
        for key in &names {
            let local = self.local_map(key);
            if local.is_empty() {
                continue;
            }
            // the local map holds the most recent values; try it first
            let local_seq = local.iter().rev().map(|(r, v)| Ok((*r, v.clone())));
            let mut value = self.latest_value(ctx, local_seq, read, &mut valid, &mut last_revs)?;

            if value.is_none()
                && prev_no_prop.is_some()
                && !self.any_revision_committed(ctx, local.keys().rev(), &valid)?
            {
                // No committed revision in the local map at all. Splitting
                // always leaves a committed anchor local, so previous
                // documents cannot hold one either; skip the scan.
                tracing::debug!(
                    "skipping previous documents, no committed revision locally \
                     for path={path} key={key}"
                );
                continue;
            }

            if self.requires_complete_map_check(ctx, value.as_ref(), local)? {
                value = None;
            }
            if value.is_none() && !self.previous_ranges().is_empty() {
                let full = self.get_visible_changes(store, key, read, prev_no_prop);
                value = self.latest_value(ctx, full, read, &mut valid, &mut last_revs)?;
            }
            if let Some(v) = value {
                if !v.value.is_empty() {
                    properties.insert(keys::unescape_property_name(key), v.value);
                }
            }
        }

        let last_revision =
            self.resolve_last_revision(min, read, branch, &last_revs);
        Ok(Some(NodeState::new(
            path,
            read.clone(),
            properties,
            self.has_children(),
            last_revision,
        )))
    }

    /// Fold the observed last modifications into the vector reported on the
    /// node state, clamping entries that are not visible from the read
    /// point.
    fn resolve_last_revision(
        &self,
        min: Revision,
        read: &RevisionVector,
        branch: Option<&Branch>,
        last_revs: &LastRevs,
    ) -> RevisionVector {
        let mut last_revision = RevisionVector::from_revisions([min]);
        let branch_base = branch.map(|b| match read.branch_revision() {
            Some(br) => b.base_at(br),
            None => b.base(),
        });
        for r in last_revs.iter() {
            if read.is_revision_newer(r) {
                // a descendant changed after the read revision; we cannot
                // know when this node changed between the two, stay on the
                // safe side and clamp to the read revision
                last_revision = match read.revision(r.writer_id()) {
                    Some(rev) => last_revision.update(*rev),
                    None => last_revision.remove(r.writer_id()),
                };
            } else if branch_base
                .map(|base| base.is_revision_newer(r))
                .unwrap_or(false)
            {
                // not visible from this branch; the base bounds what is
                let base = branch_base.expect("branch base checked above");
                last_revision = match base.revision(r.writer_id()) {
                    Some(rev) => last_revision.update(*rev),
                    None => last_revision.remove(r.writer_id()),
                };
            } else if last_revision.is_revision_newer(r) {
                last_revision = last_revision.update(*r);
            }
        }
        if branch.is_some() {
            if let Some(br) = last_revs.branch_revision() {
                last_revision = last_revision.update(*br);
            }
        }
        last_revision
    }

    /// Seed a [`LastRevs`] for a read: `_lastRev` entries, the pending
    /// modification, and the most recent committed change per writer.
    fn create_last_revs(
        &self,
        ctx: &dyn RevisionContext,
        branch: Option<&Branch>,
        pending: Option<Revision>,
    ) -> Result<LastRevs, StoreError> {
        let mut last_revs = LastRevs::new(self.last_rev());
        if let Some(r) = pending {
            last_revs.update(r);
        }
        let mut writers: std::collections::HashSet<WriterId> = self
            .local_revisions()
            .keys()
            .chain(self.local_commit_root().keys())
            .map(Revision::writer_id)
            .collect();
        let mut most_recent: Vec<&Revision> = self
            .local_revisions()
            .keys()
            .chain(self.local_commit_root().keys())
            .collect();
        most_recent.sort_by(|a, b| b.stable_cmp(a));
        for r in most_recent {
            if !writers.contains(&r.writer_id()) {
                // already found the most recent change of this writer
                continue;
            }
            let Some(cv) = ctx.commit_value(r, self)? else {
                continue;
            };
            let commit_rev = cv.resolve_commit_revision(*r);
            if cv.is_committed() {
                last_revs.update(commit_rev);
                writers.remove(&r.writer_id());
            } else if let Some(b) = branch {
                let branch_rev = commit_rev.as_branch();
                if b.contains_commit(&branch_rev) {
                    last_revs.update_branch(branch_rev);
                    writers.remove(&r.writer_id());
                }
            }
        }
        Ok(last_revs)
    }

    /// The commit revision of the property's current value when it
    /// resolves purely from the local map; `None` when the node or the
    /// property does not exist or the value sits in a previous document.
    pub fn local_commit_revision_of_property(
        &self,
        ctx: &dyn RevisionContext,
        store: &dyn DocumentStore,
        read: &RevisionVector,
        key: &str,
    ) -> Result<Option<Revision>, StoreError> {
        let mut valid = ValidRevisions::new();
        let branch = ctx.branches().branch_of(read);
        let mut last_revs = self.create_last_revs(ctx, branch, None)?;

        if self
            .live_revision(ctx, store, read, &mut valid, &mut last_revs)?
            .is_none()
        {
            // node is deleted
            return Ok(None);
        }
        let local = self.local_map(key);
        if local.is_empty() {
            return Ok(None);
        }
        let local_seq = local.iter().rev().map(|(r, v)| Ok((*r, v.clone())));
        let Some(value) = self.latest_value(ctx, local_seq, read, &mut valid, &mut last_revs)?
        else {
            return Ok(None);
        };
        if self.requires_complete_map_check(ctx, Some(&value), local)? {
            Ok(None)
        } else {
            Ok(Some(value.revision))
        }
    }
}
