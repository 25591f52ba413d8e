//! Layer 8: Split emission
//!
//! Decides when a document carries too much history and emits the update
//! operations that move the older portion into a previous document, fold
//! accumulated previous documents into intermediate ones, and keep the
//! main document bounded. Application of the emitted operations preserves
//! every read-side invariant: a committed anchor stays local for every
//! property, and previous ranges always describe exactly what moved.

use std::collections::BTreeMap;

use super::commit::CommitValue;
use super::document::{NodeDocument, RevisionMap, SplitDocType};
use super::keys;
use super::path::{DocId, Path};
use super::range::Range;
use super::revision::Revision;
use super::update::UpdateOp;
use super::vector::RevisionVector;
use crate::store::{RevisionContext, StoreError};

impl NodeDocument {
    /// Whether a maintenance pass should consider this document for
    /// splitting at all.
    pub fn is_split_candidate(&self) -> bool {
        self.serialized_size() >= keys::SPLIT_CANDIDATE_THRESHOLD
    }

    /// The update operations that split this document, empty when no
    /// splitting is required. `head` must reflect a head state captured
    /// *before* this document was read from the store; the last operation,
    /// when any, is the update of the main document.
    pub fn split(
        &self,
        ctx: &dyn RevisionContext,
        head: &RevisionVector,
    ) -> crate::Result<Vec<UpdateOp>> {
        SplitOperations::for_document(self, ctx, head, keys::NUM_REVS_THRESHOLD)
    }
}

/// One split pass over a main document.
pub(crate) struct SplitOperations<'a> {
    doc: &'a NodeDocument,
    ctx: &'a dyn RevisionContext,
    head: &'a RevisionVector,
    num_revs_threshold: usize,
    main_path: Path,
}

/// Entries selected to move, per document key.
#[derive(Default)]
struct MovedEntries {
    by_key: BTreeMap<String, RevisionMap>,
    has_branch_commits: bool,
}

impl MovedEntries {
    fn is_empty(&self) -> bool {
        self.by_key.values().all(RevisionMap::is_empty)
    }

    fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.by_key.values().flat_map(RevisionMap::keys)
    }
}

impl<'a> SplitOperations<'a> {
    pub(crate) fn for_document(
        doc: &'a NodeDocument,
        ctx: &'a dyn RevisionContext,
        head: &'a RevisionVector,
        num_revs_threshold: usize,
    ) -> crate::Result<Vec<UpdateOp>> {
        // an unreadable _sdType fails fast rather than splitting blindly
        if doc.id().is_previous() || doc.split_doc_type()? != SplitDocType::None {
            // only main documents split
            return Ok(Vec::new());
        }
        let main_path = doc
            .main_path()
            .map_err(crate::core::error::CoreError::from)?;
        let split = SplitOperations {
            doc,
            ctx,
            head,
            num_revs_threshold,
            main_path,
        };
        Ok(split.create()?)
    }

    fn create(&self) -> Result<Vec<UpdateOp>, StoreError> {
        if !self.needs_split() {
            return Ok(Vec::new());
        }
        let moved = self.collect_movable()?;
        if moved.is_empty() {
            return Ok(Vec::new());
        }

        let mut high = None;
        let mut low = None;
        for r in moved.revisions() {
            high = Some(high.map_or(*r, |h: Revision| if h.stable_cmp(r).is_lt() { *r } else { h }));
            low = Some(low.map_or(*r, |l: Revision| if l.stable_cmp(r).is_gt() { *r } else { l }));
        }
        let (high, low) = (
            high.expect("moved entries are non-empty"),
            low.expect("moved entries are non-empty"),
        );
        let range = Range::new(high, low, 0).map_err(StoreError::corrupt)?;

        let mut ops = Vec::new();
        ops.push(self.previous_doc_op(&range, &moved));

        let mut main_op = UpdateOp::new(self.doc.id().clone());
        for (key, entries) in &moved.by_key {
            for rev in entries.keys() {
                main_op.remove_map_entry(key, *rev);
            }
        }
        // a crashed earlier split may have left an entry with the same
        // high; hide it before the new range takes its place
        if let Some(existing) = self.doc.previous_ranges_including_stale().get(&high) {
            if existing.height != 0 {
                main_op.set_stale_previous(high, existing.height);
            }
        }
        main_op.set_previous(&range);

        ops.extend(self.intermediate_ops(&mut main_op)?);
        ops.push(main_op);
        Ok(ops)
    }

    fn needs_split(&self) -> bool {
        if self.doc.serialized_size() >= keys::DOC_SIZE_THRESHOLD {
            return true;
        }
        self.splittable_keys()
            .any(|key| self.doc.local_map(key).len() >= self.num_revs_threshold)
    }

    fn splittable_keys(&self) -> impl Iterator<Item = &str> {
        self.doc.keys().filter(|k| {
            keys::is_property_name(k)
                || matches!(*k, keys::REVISIONS | keys::COMMIT_ROOT | keys::DELETED)
        })
    }

    /// Select the entries that move: committed changes of the local writer
    /// whose resolved commit revision is visible from the head. Property
    /// maps and `_deleted` always keep their newest committed entry local,
    /// as the most-recent-committed anchor readers rely on.
    fn collect_movable(&self) -> Result<MovedEntries, StoreError> {
        let mut moved = MovedEntries::default();
        let writer_id = self.ctx.writer_id();
        for key in self.splittable_keys() {
            let keeps_anchor =
                keys::is_property_name(key) || key == keys::DELETED;
            let local = self.doc.local_map(key);
            let mut entries = RevisionMap::new();
            let mut anchor_kept = !keeps_anchor;
            for (r, value) in local.iter().rev() {
                let Some(cv) = self.ctx.commit_value(r, self.doc)? else {
                    continue;
                };
                if !cv.is_committed() {
                    // unmerged branch changes stay local
                    continue;
                }
                if !anchor_kept {
                    // newest committed entry stays local
                    anchor_kept = true;
                    continue;
                }
                if r.writer_id() != writer_id {
                    continue;
                }
                let resolved = cv.resolve_commit_revision(*r);
                if self.head.is_revision_newer(&resolved) {
                    // not yet visible from the captured head
                    continue;
                }
                if matches!(cv, CommitValue::CommittedBranch(_)) {
                    moved.has_branch_commits = true;
                }
                entries.insert(*r, value.clone());
            }
            if !entries.is_empty() {
                moved.by_key.insert(key.to_string(), entries);
            }
        }
        Ok(moved)
    }

    fn previous_doc_op(&self, range: &Range, moved: &MovedEntries) -> UpdateOp {
        let id = DocId::for_previous(&self.main_path, &range.high, range.height);
        let mut op = UpdateOp::new_document(id);
        for (key, entries) in &moved.by_key {
            for (rev, value) in entries {
                op.set_map_entry(key, *rev, value);
            }
        }
        op.set(keys::SD_TYPE, self.leaf_type(moved).code());
        op.set(
            keys::SD_MAX_REV_TIME,
            keys::modified_in_secs(range.high.timestamp()),
        );
        op
    }

    fn leaf_type(&self, moved: &MovedEntries) -> SplitDocType {
        if !self.doc.has_children() {
            return SplitDocType::DefaultLeaf;
        }
        let only_commit_root = moved
            .by_key
            .keys()
            .all(|k| k == keys::COMMIT_ROOT);
        if only_commit_root {
            return SplitDocType::CommitRootOnly;
        }
        if !moved.has_branch_commits {
            return SplitDocType::DefaultNoBranch;
        }
        SplitDocType::Default
    }

    /// Fold accumulated previous documents of one height into an
    /// intermediate document once the fan-out is reached. Folding may
    /// cascade into the next height.
    fn intermediate_ops(&self, main_op: &mut UpdateOp) -> Result<Vec<UpdateOp>, StoreError> {
        let writer_id = self.ctx.writer_id();
        let mut by_height: BTreeMap<u32, Vec<Range>> = BTreeMap::new();
        for range in self.doc.previous_ranges().values() {
            if range.high.writer_id() == writer_id {
                by_height.entry(range.height).or_default().push(*range);
            }
        }

        let mut ops = Vec::new();
        let mut height = 0;
        while let Some(ranges) = by_height.get(&height).cloned() {
            if ranges.len() < keys::PREV_SPLIT_FACTOR {
                height += 1;
                continue;
            }
            let high = ranges
                .iter()
                .map(|r| r.high)
                .max_by(|a, b| a.stable_cmp(b))
                .expect("fan-out reached");
            let low = ranges
                .iter()
                .map(|r| r.low)
                .min_by(|a, b| a.stable_cmp(b))
                .expect("fan-out reached");
            let folded = Range::new(high, low, height + 1).map_err(StoreError::corrupt)?;

            let id = DocId::for_previous(&self.main_path, &high, folded.height);
            let mut op = UpdateOp::new_document(id);
            for range in &ranges {
                op.set_previous(range);
                main_op.remove_previous(range);
            }
            op.set(keys::SD_TYPE, SplitDocType::Intermediate.code());
            op.set(
                keys::SD_MAX_REV_TIME,
                keys::modified_in_secs(high.timestamp()),
            );
            ops.push(op);

            main_op.set_previous(&folded);
            by_height.entry(folded.height).or_default().push(folded);
            height += 1;
        }
        Ok(ops)
    }
}
