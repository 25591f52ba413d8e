//! Layer 7: Newest-revision scan
//!
//! A committing writer asks for the newest change on the document as seen
//! from its base revision, collecting every concurrent change that would
//! collide with the commit along the way.

use std::collections::{HashMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};

use super::document::NodeDocument;
use super::keys;
use super::revision::{Revision, WriterId};
use super::value_map::MergeDescending;
use super::vector::RevisionVector;
use super::visibility::ValidRevisions;
use crate::store::{Branch, DocumentStore, RevisionContext, StoreError};

impl NodeDocument {
    /// The newest change on this document visible from `base`, or `None`
    /// when there is none or the node is deleted at that change.
    ///
    /// Collisions collected for `change` are:
    /// - changes that are not committed yet,
    /// - unmerged branch commits outside `change`'s branch,
    /// - changes after the branch base when `change` is a branch commit,
    /// - committed changes not yet visible to this cluster node.
    pub fn newest_revision(
        &self,
        ctx: &dyn RevisionContext,
        store: &dyn DocumentStore,
        base: &RevisionVector,
        change: Revision,
        branch: Option<&Branch>,
        collisions: &mut HashSet<Revision>,
    ) -> Result<Option<Revision>, StoreError> {
        debug_assert!(
            !base.is_branch() || branch.is_some(),
            "branch must be present for a branch base"
        );
        let head = ctx.head_revision();
        let lower = branch.map(Branch::base).unwrap_or(base);

        // the writers to check when walking previous documents
        let mut writers: HashSet<WriterId> = HashSet::new();
        if !self.previous_ranges().is_empty() {
            for high in self.previous_ranges().keys() {
                if lower.is_revision_newer(high)
                    || lower.revision(high.writer_id()) == Some(high)
                {
                    writers.insert(high.writer_id());
                }
            }
            if !writers.is_empty() {
                for r in self
                    .local_revisions()
                    .keys()
                    .chain(self.local_commit_root().keys())
                {
                    writers.insert(r.writer_id());
                }
            }
        }

        let full_scan = writers.is_empty();
        let changes: Box<dyn Iterator<Item = Result<Revision, StoreError>> + '_> = if full_scan {
            // no previous document reaches past the base; the local maps
            // are enough
            Box::new(MergeDescending::new(
                vec![
                    Box::new(self.local_revisions().keys().rev().copied().map(Ok)),
                    Box::new(self.local_commit_root().keys().rev().copied().map(Ok)),
                ],
                |r| *r,
                true,
            ))
        } else {
            Box::new(MergeDescending::new(
                vec![
                    Box::new(self.local_revisions().keys().rev().copied().map(Ok)),
                    Box::new(self.local_commit_root().keys().rev().copied().map(Ok)),
                    Box::new(self.get_changes(store, keys::REVISIONS, lower)?),
                    Box::new(self.get_changes(store, keys::COMMIT_ROOT, lower)?),
                ],
                |r| *r,
                true,
            ))
        };

        let mut newest_revs: HashMap<WriterId, Revision> = HashMap::new();
        let mut valid = ValidRevisions::new();
        for r in changes {
            let r = r?;
            if r == change {
                continue;
            }
            if !full_scan {
                // check whether the scan can stop: every tracked writer has
                // its newest revision and the rest is older than the bound
                if writers.contains(&r.writer_id())
                    && !lower.is_revision_newer(&r)
                    && newest_revs.contains_key(&r.writer_id())
                {
                    writers.remove(&r.writer_id());
                    if writers.is_empty() {
                        break;
                    }
                }
            }
            if newest_revs.contains_key(&r.writer_id()) {
                // the newest committed change of this writer is known; keep
                // collecting collisions up to the branch base
                if let Some(b) = branch {
                    if !b.contains_commit(&r) && b.base_at(&change).is_revision_newer(&r) {
                        collisions.insert(r);
                    }
                }
            } else if self.is_valid_revision(ctx, &r, None, base, &mut valid)? {
                newest_revs.insert(r.writer_id(), r);
            } else {
                // not visible from base; five possible reasons, one of
                // which is benign (committed and newer than a trunk base)
                let commit_revision = ctx
                    .commit_value(&r, self)?
                    .filter(|cv| cv.is_committed())
                    .map(|cv| cv.resolve_commit_revision(r));
                match commit_revision {
                    // committed but not yet visible to this cluster node
                    Some(cr) if head.is_revision_newer(&cr) => {
                        collisions.insert(r);
                    }
                    // committed and newer than the trunk base
                    Some(_) if branch.is_none() && base.is_revision_newer(&r) => {
                        newest_revs.insert(r.writer_id(), r);
                    }
                    // uncommitted, or on a foreign branch, or after the
                    // branch base
                    _ => {
                        collisions.insert(r);
                    }
                }
            }
        }

        let newest = newest_revs
            .values()
            .copied()
            .max_by(|a, b| a.stable_cmp(b));
        let Some(newest) = newest else {
            return Ok(None);
        };

        // the local deleted map holds the most recent entries
        let deleted = self.local_deleted();
        let mut value = deleted.get(&newest).cloned();
        if value.is_none()
            && deleted
                .range((Excluded(newest), Unbounded))
                .next()
                .is_none()
        {
            // newest is newer than every local deleted entry; previous
            // documents cannot say otherwise
            return Ok(Some(newest));
        }
        if value.is_none() {
            value = self.value_map_get(store, keys::DELETED, &newest)?;
        }
        if value.as_deref() == Some("true") {
            // deleted at the newest revision
            Ok(None)
        } else {
            Ok(Some(newest))
        }
    }
}
