//! Layer 5: The node document record
//!
//! One record per content-tree node, holding the node's entire pre-split
//! revision history. Instances are sealed after load and never mutated;
//! writers emit an `UpdateOp` and the store applies it atomically.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use super::commit::CommitValue;
use super::error::{InconsistentSplitType, MalformedSplitType};
use super::keys;
use super::path::{DocId, Path};
use super::range::{PreviousIndex, Range};
use super::revision::{Revision, WriterId};
use super::silencer::LogSilencer;
use super::update::UpdateOp;
use super::vector::RevisionVector;
use crate::store::{DocumentStore, StoreError};

/// A revision-keyed map, iterated newest-first via `.iter().rev()`.
pub type RevisionMap = BTreeMap<Revision, String>;

/// One document value: a scalar system field or a revision-keyed map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocValue {
    Bool(bool),
    Long(i64),
    String(String),
    Map(RevisionMap),
}

impl DocValue {
    pub fn as_map(&self) -> Option<&RevisionMap> {
        match self {
            DocValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            DocValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DocValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocValue::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Classification of documents produced by splitting, stored as `_sdType`.
///
/// The deprecated codes are still read correctly for deployed data but are
/// never emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitDocType {
    /// Not a split document.
    None,
    /// Contains all types of data.
    Default,
    /// Deprecated: all data, main document had no child at split time.
    DefaultNoChild,
    /// Deprecated: no `_revisions` history.
    PropCommitOnly,
    /// Only holds version ranges pointing at deeper previous documents.
    Intermediate,
    /// All data; the main document had no child at split time.
    DefaultLeaf,
    /// Only `_commitRoot` entries.
    CommitRootOnly,
    /// All data, but no branch commits.
    DefaultNoBranch,
}

impl SplitDocType {
    pub fn code(self) -> i64 {
        match self {
            SplitDocType::None => -1,
            SplitDocType::Default => 10,
            SplitDocType::DefaultNoChild => 20,
            SplitDocType::PropCommitOnly => 30,
            SplitDocType::Intermediate => 40,
            SplitDocType::DefaultLeaf => 50,
            SplitDocType::CommitRootOnly => 60,
            SplitDocType::DefaultNoBranch => 70,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, InconsistentSplitType> {
        match code {
            -1 => Ok(SplitDocType::None),
            10 => Ok(SplitDocType::Default),
            20 => Ok(SplitDocType::DefaultNoChild),
            30 => Ok(SplitDocType::PropCommitOnly),
            40 => Ok(SplitDocType::Intermediate),
            50 => Ok(SplitDocType::DefaultLeaf),
            60 => Ok(SplitDocType::CommitRootOnly),
            70 => Ok(SplitDocType::DefaultNoBranch),
            _ => Err(InconsistentSplitType { code }),
        }
    }
}

/// The per-node record of the store.
pub struct NodeDocument {
    id: DocId,
    data: BTreeMap<String, DocValue>,
    sealed: bool,
    created: u64,
    last_check_time: AtomicU64,
    previous: OnceLock<PreviousIndex>,
}

impl NodeDocument {
    pub fn new(id: DocId) -> Self {
        Self::with_created(id, now_ms())
    }

    /// Construct with an explicit creation time. The creation time feeds the
    /// stale-eviction heuristic when a dangling previous-document pointer is
    /// observed; it differs from the current time when a document is
    /// resurrected from its serialized form.
    pub fn with_created(id: DocId, created: u64) -> Self {
        Self {
            id,
            data: BTreeMap::new(),
            sealed: false,
            created,
            last_check_time: AtomicU64::new(now_ms()),
            previous: OnceLock::new(),
        }
    }

    /// The shared "not found" sentinel. Compare by pointer identity.
    pub fn null() -> &'static NodeDocument {
        static NULL: OnceLock<NodeDocument> = OnceLock::new();
        NULL.get_or_init(|| {
            let mut doc = NodeDocument::with_created(DocId::from_path(&Path::root()), 0);
            doc.seal();
            doc
        })
    }

    pub fn is_null(&self) -> bool {
        std::ptr::eq(self, Self::null())
    }

    /// Set one entry. Only valid while loading, before `seal()`.
    pub fn put(&mut self, key: impl Into<String>, value: DocValue) {
        debug_assert!(!self.sealed, "sealed documents are read-only");
        self.data.insert(key.into(), value);
    }

    /// Make the document read-only.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// A mutable copy for applying an update; the store seals it again
    /// before publishing.
    pub(crate) fn unsealed_clone(&self) -> NodeDocument {
        let mut doc = self.clone();
        doc.sealed = false;
        doc
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn id(&self) -> &DocId {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.data.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|k| k.as_str())
    }

    pub(crate) fn data(&self) -> &BTreeMap<String, DocValue> {
        &self.data
    }

    /// The system time this record was created (not the node).
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Time at which this instance was last checked for cache consistency.
    pub fn last_check_time(&self) -> u64 {
        self.last_check_time.load(AtomicOrdering::Relaxed)
    }

    /// Record that the reader independently confirmed this instance is
    /// consistent at `check_time`.
    pub fn mark_up_to_date(&self, check_time: u64) {
        self.last_check_time
            .fetch_max(check_time, AtomicOrdering::Relaxed);
    }

    //----------------------- scalar accessors -----------------------------

    pub fn modified(&self) -> Option<i64> {
        self.get(keys::MODIFIED_IN_SECS).and_then(DocValue::as_long)
    }

    pub fn has_children(&self) -> bool {
        self.get(keys::CHILDREN_FLAG)
            .and_then(DocValue::as_bool)
            .unwrap_or(false)
    }

    pub fn was_deleted_once(&self) -> bool {
        self.get(keys::DELETED_ONCE)
            .and_then(DocValue::as_bool)
            .unwrap_or(false)
    }

    pub fn has_binary(&self) -> bool {
        self.get(keys::HAS_BINARY_FLAG).and_then(DocValue::as_long)
            == Some(keys::HAS_BINARY_VAL)
    }

    /// True when the node was modified after `ts` (5-second resolution).
    pub fn has_been_modified_since(&self, ts_ms: u64) -> bool {
        self.modified()
            .map(|m| m > keys::modified_in_secs(ts_ms))
            .unwrap_or(false)
    }

    /// True when every `_revisions` and `_commitRoot` entry is older than
    /// `max_ts_ms`.
    pub fn has_all_revisions_less_than(&self, max_ts_ms: u64) -> bool {
        self.local_revisions()
            .keys()
            .chain(self.local_commit_root().keys())
            .all(|r| r.timestamp() < max_ts_ms)
    }

    pub fn split_doc_type(&self) -> Result<SplitDocType, super::error::CoreError> {
        match self.get(keys::SD_TYPE) {
            None => Ok(SplitDocType::None),
            Some(DocValue::Long(code)) => Ok(SplitDocType::from_code(*code)?),
            Some(other) => Err(MalformedSplitType {
                raw: format!("{other:?}"),
            }
            .into()),
        }
    }

    pub fn is_split_document(&self) -> bool {
        !matches!(self.split_doc_type(), Ok(SplitDocType::None))
    }

    /// Upper bound (5-second resolution) on revisions in this previous
    /// document.
    pub fn sd_max_rev_time(&self) -> Option<i64> {
        self.get(keys::SD_MAX_REV_TIME).and_then(DocValue::as_long)
    }

    //----------------------- paths ----------------------------------------

    /// The path of this document: the `_path` field when present, otherwise
    /// derived from the id.
    pub fn path_str(&self) -> String {
        if let Some(p) = self.get(keys::PATH).and_then(DocValue::as_str) {
            return p.to_string();
        }
        self.id.path_part().to_string()
    }

    /// The path of the *main* document. For a previous document the main
    /// path sits between the `p` prefix and the trailing
    /// `/<high>/<height>`.
    pub fn main_path(&self) -> Result<Path, super::error::MalformedDocument> {
        let p = self.path_str();
        let Some(rest) = p.strip_prefix('p') else {
            return Path::parse(p);
        };
        let Some(idx) = rest.rfind('/').and_then(|i| rest[..i].rfind('/')) else {
            return Err(super::error::MalformedDocument::new(format!(
                "previous path `{p}` is not of the form p/<path>/<high>/<height>"
            )));
        };
        let main = &rest[..idx];
        if main.is_empty() {
            Ok(Path::root())
        } else {
            Path::parse(main)
        }
    }

    //----------------------- local maps -----------------------------------

    /// The local map for `key`, without previous documents. Empty when the
    /// key is absent or holds a scalar.
    pub fn local_map(&self, key: &str) -> &RevisionMap {
        self.get(key)
            .and_then(DocValue::as_map)
            .unwrap_or_else(|| empty_map())
    }

    pub fn local_revisions(&self) -> &RevisionMap {
        self.local_map(keys::REVISIONS)
    }

    pub fn local_commit_root(&self) -> &RevisionMap {
        self.local_map(keys::COMMIT_ROOT)
    }

    pub fn local_deleted(&self) -> &RevisionMap {
        self.local_map(keys::DELETED)
    }

    pub fn stale_prev(&self) -> &RevisionMap {
        self.local_map(keys::STALE_PREV)
    }

    /// Branch commit markers on this document only.
    pub fn local_branch_commits(&self) -> impl DoubleEndedIterator<Item = &Revision> {
        self.local_map(keys::BRANCH_COMMITS).keys()
    }

    /// All (escaped) property names on this document.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.keys().filter(|k| keys::is_property_name(k))
    }

    /// The per-writer `_lastRev` entries.
    pub fn last_rev(&self) -> BTreeMap<WriterId, Revision> {
        let mut map = BTreeMap::new();
        for (key, value) in self.local_map(keys::LAST_REV) {
            if let Ok(rev) = value.parse::<Revision>() {
                map.insert(key.writer_id(), rev);
            }
        }
        map
    }

    /// The per-writer sweep revisions as a vector. Empty when none are set.
    pub fn sweep_revisions(&self) -> RevisionVector {
        self.local_map(keys::SWEEP_REV)
            .values()
            .filter_map(|v| v.parse::<Revision>().ok())
            .collect()
    }

    //----------------------- previous documents ---------------------------

    /// Previous revision ranges, newest first, without stale entries.
    pub fn previous_ranges(&self) -> &PreviousIndex {
        self.previous
            .get_or_init(|| self.create_previous_ranges(false))
    }

    /// Previous revision ranges, newest first, including stale entries.
    pub fn previous_ranges_including_stale(&self) -> PreviousIndex {
        self.create_previous_ranges(true)
    }

    fn create_previous_ranges(&self, include_stale: bool) -> PreviousIndex {
        let mut index = PreviousIndex::new();
        let stale = self.stale_prev();
        for (high, value) in self.local_map(keys::PREVIOUS) {
            let range = match Range::from_entry(*high, value) {
                Ok(range) => range,
                Err(e) => {
                    tracing::warn!("document {}: ignoring {e}", self.id);
                    continue;
                }
            };
            if !include_stale && stale.get(high).map(String::as_str)
                == Some(range.height.to_string().as_str())
            {
                continue;
            }
            index.insert(range);
        }
        index
    }

    /// Load a previous document by id, applying the missing-document policy
    /// when it is gone: log through the silencer, evict stale cache entries,
    /// and continue with `None`. Store I/O errors surface unchanged.
    pub(crate) fn previous_document(
        &self,
        store: &dyn DocumentStore,
        prev_id: &DocId,
        rev: &Revision,
    ) -> Result<Option<Arc<NodeDocument>>, StoreError> {
        tracing::trace!("get previous document {prev_id}");
        match store.find(prev_id)? {
            Some(doc) => Ok(Some(doc)),
            None => {
                self.previous_document_not_found(store, prev_id, rev);
                Ok(None)
            }
        }
    }

    pub(crate) fn previous_doc(
        &self,
        store: &dyn DocumentStore,
        range: &Range,
    ) -> Result<Option<Arc<NodeDocument>>, StoreError> {
        let prev_id = self.previous_doc_id(range)?;
        self.previous_document(store, &prev_id, &range.high)
    }

    pub(crate) fn previous_doc_id(&self, range: &Range) -> Result<DocId, StoreError> {
        let main = self.main_path().map_err(StoreError::corrupt)?;
        Ok(DocId::for_previous(&main, &range.high, range.height))
    }

    fn previous_document_not_found(
        &self,
        store: &dyn DocumentStore,
        prev_id: &DocId,
        rev: &Revision,
    ) {
        let silenced = log_silencer().silence(prev_id.as_str());
        if !silenced {
            tracing::warn!("document with previous revisions not found: {prev_id}");
        } else {
            tracing::debug!("document with previous revisions not found: {prev_id}");
        }
        // The main document may be stale. Evict it from the cache if it is
        // older than one minute, along with intermediate documents on the
        // failed path, but not more often than the silencer allows.
        let Ok(path) = self.main_path() else {
            return;
        };
        let mut id = DocId::from_path(&path);
        let now = now_ms();
        let mut doc = store.get_if_cached(&id);
        while let Some(cached) = doc {
            if cached.created() + 60_000 >= now {
                break;
            }
            if !silenced {
                tracing::info!("invalidated cached document {id}");
            } else {
                tracing::debug!("invalidated cached document {id}");
            }
            store.invalidate_cache(&id);
            doc = None;
            for range in cached.previous_ranges().values() {
                if range.includes(rev) {
                    id = DocId::for_previous(&path, &range.high, range.height);
                    doc = store.get_if_cached(&id);
                    break;
                }
            }
        }
    }

    /// All previous documents reachable from this one, including documents
    /// referenced by intermediate documents.
    pub fn all_previous_docs(
        &self,
        store: &dyn DocumentStore,
    ) -> Result<Vec<Arc<NodeDocument>>, StoreError> {
        let mut queue: Vec<Range> = self.previous_ranges().values().copied().collect();
        let mut docs = Vec::new();
        while let Some(range) = queue.pop() {
            if let Some(prev) = self.previous_doc(store, &range)? {
                queue.extend(prev.previous_ranges().values().copied());
                docs.push(prev);
            }
        }
        Ok(docs)
    }

    /// Previous leaf documents (height 0), descending by most recent change,
    /// expanding intermediate documents along the way.
    pub fn previous_doc_leaves(
        &self,
        store: &dyn DocumentStore,
    ) -> Result<Vec<Arc<NodeDocument>>, StoreError> {
        let mut ranges: BTreeMap<Revision, Range> = self
            .previous_ranges()
            .values()
            .map(|r| (r.high, *r))
            .collect();
        let mut leaves = Vec::new();
        while let Some((&high, &range)) = ranges.iter().next_back() {
            ranges.remove(&high);
            let Some(prev) = self.previous_doc(store, &range)? else {
                continue;
            };
            if range.height == 0 {
                leaves.push(prev);
            } else {
                for r in prev.previous_ranges().values() {
                    ranges.insert(r.high, *r);
                }
            }
        }
        Ok(leaves)
    }

    /// The document holding the `_prev` entry for `(revision, height)`:
    /// this document or an intermediate split document, `None` when no such
    /// reference exists.
    pub fn find_prev_referencing_doc(
        self: Arc<Self>,
        store: &dyn DocumentStore,
        revision: &Revision,
        height: u32,
    ) -> Result<Option<Arc<NodeDocument>>, StoreError> {
        for range in self.previous_ranges().values() {
            if range.height == height && range.high == *revision {
                return Ok(Some(Arc::clone(&self)));
            }
            if range.includes(revision) {
                let prev_id = self.previous_doc_id(range)?;
                let Some(prev) = store.find(&prev_id)? else {
                    tracing::warn!(
                        "split document {prev_id} does not exist anymore, main document is {}",
                        self.id
                    );
                    continue;
                };
                if let Some(doc) = prev.find_prev_referencing_doc(store, revision, height)? {
                    return Ok(Some(doc));
                }
            }
        }
        Ok(None)
    }

    /// Previous documents whose value map for `property` contains
    /// `revision`, newest first.
    pub(crate) fn previous_docs_containing(
        &self,
        store: &dyn DocumentStore,
        property: &str,
        revision: &Revision,
    ) -> Result<Vec<Arc<NodeDocument>>, StoreError> {
        if self.previous_ranges().is_empty() {
            return Ok(Vec::new());
        }
        // first try to look up the revision directly
        if let Some(range) = self.previous_ranges().floor_entry(revision) {
            if let Some(prev) = self.previous_doc(store, range)? {
                if prev.value_map_contains(store, property, revision)? {
                    return Ok(vec![prev]);
                }
            }
        }
        // did not find an entry, scan the remaining newer ranges
        let candidates: Vec<Range> = self
            .previous_ranges()
            .head_map(revision)
            .filter(|range| range.includes(revision))
            .copied()
            .collect();
        let mut docs = Vec::new();
        for range in candidates {
            if let Some(prev) = self.previous_doc(store, &range)? {
                if prev.value_map_contains(store, property, revision)? {
                    docs.push(prev);
                }
            }
        }
        Ok(docs)
    }

    //----------------------- commit bookkeeping ---------------------------

    /// True when `revision` is present in `_revisions`, here or in a
    /// previous document.
    pub fn contains_revision(
        &self,
        store: &dyn DocumentStore,
        revision: &Revision,
    ) -> Result<bool, StoreError> {
        if self.local_revisions().contains_key(revision) {
            return Ok(true);
        }
        for prev in self.previous_docs_containing(store, keys::REVISIONS, revision)? {
            if prev.contains_revision(store, revision)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The raw commit value stored for `revision` on this document or its
    /// previous documents.
    pub fn commit_value(
        &self,
        store: &dyn DocumentStore,
        revision: &Revision,
    ) -> Result<Option<CommitValue>, StoreError> {
        if let Some(raw) = self.local_revisions().get(revision) {
            return Ok(parse_commit_value(&self.id, revision, raw));
        }
        for prev in self.previous_docs_containing(store, keys::REVISIONS, revision)? {
            if let Some(cv) = prev.commit_value(store, revision)? {
                return Ok(Some(cv));
            }
        }
        Ok(None)
    }

    /// Resolve the commit value for a change on this document, following the
    /// commit root when the commit was rooted elsewhere.
    pub fn resolve_commit_value(
        &self,
        store: &dyn DocumentStore,
        revision: &Revision,
    ) -> Result<Option<CommitValue>, StoreError> {
        match self.commit_root(store, revision)? {
            CommitRoot::Local => self.commit_value(store, revision),
            CommitRoot::Other(doc) => doc.commit_value(store, revision),
            CommitRoot::Unknown => Ok(None),
        }
    }

    fn commit_root(
        &self,
        store: &dyn DocumentStore,
        revision: &Revision,
    ) -> Result<CommitRoot, StoreError> {
        if self.local_revisions().contains_key(revision) {
            return Ok(CommitRoot::Local);
        }
        let path = if let Some(depth) = self.local_commit_root().get(revision) {
            self.path_at_depth(depth)?
        } else {
            // fall back to a complete check, including previous documents
            if self.contains_revision(store, revision)? {
                return Ok(CommitRoot::Local);
            }
            match self.commit_root_path(store, revision)? {
                Some(path) => path,
                // may happen for a commit root document which has not been
                // updated with the commit revision yet
                None => return Ok(CommitRoot::Unknown),
            }
        };
        match store.find(&DocId::from_path(&path))? {
            Some(doc) => Ok(CommitRoot::Other(doc)),
            None => Ok(CommitRoot::Unknown),
        }
    }

    /// The commit root path for `revision`, or `None` when this document
    /// has no commit root entry for it.
    pub fn commit_root_path(
        &self,
        store: &dyn DocumentStore,
        revision: &Revision,
    ) -> Result<Option<Path>, StoreError> {
        match self.commit_root_depth(store, revision)? {
            Some(depth) => Ok(Some(self.path_at_depth(&depth)?)),
            None => Ok(None),
        }
    }

    /// The commit root depth for `revision`, also considering previous
    /// documents.
    pub fn commit_root_depth(
        &self,
        store: &dyn DocumentStore,
        revision: &Revision,
    ) -> Result<Option<String>, StoreError> {
        if let Some(depth) = self.local_commit_root().get(revision) {
            return Ok(Some(depth.clone()));
        }
        for prev in self.previous_docs_containing(store, keys::COMMIT_ROOT, revision)? {
            if let Some(depth) = prev.commit_root_depth(store, revision)? {
                return Ok(Some(depth));
            }
        }
        Ok(None)
    }

    fn path_at_depth(&self, depth: &str) -> Result<Path, StoreError> {
        let path = self.main_path().map_err(StoreError::corrupt)?;
        if depth == "0" {
            return Ok(Path::root());
        }
        let depth: u32 = depth
            .parse()
            .map_err(|_| StoreError::corrupt_msg(format!("commit root depth `{depth}`")))?;
        Ok(path.ancestor(path.depth().saturating_sub(depth)))
    }

    /// The conflicts recorded for the given changes: the commits which left
    /// collision markers for one of them. Unparsable legacy markers are
    /// skipped.
    pub fn conflicts_for(&self, changes: &[Revision]) -> HashSet<Revision> {
        let collisions = self.local_map(keys::COLLISIONS);
        changes
            .iter()
            .filter_map(|r| collisions.get(&r.as_trunk()))
            .filter_map(|value| value.parse::<Revision>().ok())
            .collect()
    }

    //----------------------- maintenance ----------------------------------

    /// Remove this writer's uncommitted `_revisions` and `_bc` entries in
    /// batches. Only safe on startup, before new commits are in flight.
    /// Returns the number of purged revisions.
    pub fn purge_uncommitted_revisions(
        &self,
        store: &dyn DocumentStore,
        writer_id: WriterId,
        batch_size: usize,
        older_than: impl Fn(&Revision) -> bool,
    ) -> Result<usize, StoreError> {
        // uncommitted revisions are never split off; the local maps suffice
        let revisions = self.local_revisions();
        let mut purged = HashSet::new();
        let mut op = UpdateOp::new(self.id.clone());
        for (r, value) in revisions.iter().rev() {
            let committed = value.parse::<CommitValue>().map(|cv| cv.is_committed());
            if committed.unwrap_or(false) {
                continue;
            }
            if r.writer_id() == writer_id && older_than(r) {
                purged.insert(*r);
                op.remove_revision(*r);
            }
            if op.changes().len() >= batch_size {
                store.find_and_update(&op)?;
                op = UpdateOp::new(self.id.clone());
            }
        }
        if op.has_changes() {
            store.find_and_update(&op)?;
            op = UpdateOp::new(self.id.clone());
        }

        for r in self.local_branch_commits() {
            let committed = revisions
                .get(r)
                .and_then(|v| v.parse::<CommitValue>().ok())
                .map(|cv| cv.is_committed())
                .unwrap_or(false);
            if !committed && r.writer_id() == writer_id && older_than(r) {
                purged.insert(*r);
                op.remove_branch_commit(*r);
            }
            if op.changes().len() >= batch_size {
                store.find_and_update(&op)?;
                op = UpdateOp::new(self.id.clone());
            }
        }
        if op.has_changes() {
            store.find_and_update(&op)?;
        }
        Ok(purged.len())
    }

    /// Remove this writer's collision markers in batches. Only safe when no
    /// commits are pending. Returns the number of removed markers.
    pub fn purge_collision_markers(
        &self,
        store: &dyn DocumentStore,
        writer_id: WriterId,
        batch_size: usize,
        older_than: impl Fn(&Revision) -> bool,
    ) -> Result<usize, StoreError> {
        let mut purged = 0;
        let mut op = UpdateOp::new(self.id.clone());
        for r in self.local_map(keys::COLLISIONS).keys().rev() {
            if r.writer_id() == writer_id && older_than(r) {
                purged += 1;
                op.remove_collision(*r);
            }
            if op.changes().len() >= batch_size {
                store.find_and_update(&op)?;
                op = UpdateOp::new(self.id.clone());
            }
        }
        if op.has_changes() {
            store.find_and_update(&op)?;
        }
        Ok(purged)
    }
}

enum CommitRoot {
    Local,
    Other(Arc<NodeDocument>),
    Unknown,
}

impl Clone for NodeDocument {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            data: self.data.clone(),
            sealed: self.sealed,
            created: self.created,
            last_check_time: AtomicU64::new(self.last_check_time()),
            previous: OnceLock::new(),
        }
    }
}

impl PartialEq for NodeDocument {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.data == other.data
    }
}

impl Eq for NodeDocument {}

impl fmt::Debug for NodeDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDocument")
            .field("id", &self.id)
            .field("data", &self.data)
            .finish()
    }
}

pub(crate) fn parse_commit_value(
    id: &DocId,
    revision: &Revision,
    raw: &str,
) -> Option<CommitValue> {
    match raw.parse() {
        Ok(cv) => Some(cv),
        Err(e) => {
            tracing::warn!("document {id}: commit value for {revision} is unreadable: {e}");
            None
        }
    }
}

fn empty_map() -> &'static RevisionMap {
    static EMPTY: OnceLock<RevisionMap> = OnceLock::new();
    EMPTY.get_or_init(RevisionMap::new)
}

fn log_silencer() -> &'static LogSilencer {
    static SILENCER: OnceLock<LogSilencer> = OnceLock::new();
    SILENCER.get_or_init(LogSilencer::default)
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(ts: u64, writer: WriterId) -> Revision {
        Revision::new(ts, 0, writer)
    }

    fn doc(id: &str) -> NodeDocument {
        NodeDocument::new(DocId::parse(id).unwrap())
    }

    #[test]
    fn local_map_is_empty_for_missing_and_scalar_keys() {
        let mut d = doc("1:/a");
        d.put("_modified", DocValue::Long(5));
        d.seal();
        assert!(d.local_map("_revisions").is_empty());
        assert!(d.local_map("_modified").is_empty());
    }

    #[test]
    fn previous_ranges_filter_stale_entries() {
        let mut d = doc("1:/a");
        let high = rev(100, 1);
        let mut prev = RevisionMap::new();
        prev.insert(high, "a-0-1/0".to_string());
        let mut stale = RevisionMap::new();
        stale.insert(high, "0".to_string());
        d.put(keys::PREVIOUS, DocValue::Map(prev));
        d.put(keys::STALE_PREV, DocValue::Map(stale));
        d.seal();

        assert!(d.previous_ranges().is_empty());
        assert_eq!(d.previous_ranges_including_stale().len(), 1);
    }

    #[test]
    fn stale_entry_with_other_height_is_kept() {
        let mut d = doc("1:/a");
        let high = rev(100, 1);
        let mut prev = RevisionMap::new();
        prev.insert(high, "a-0-1/0".to_string());
        let mut stale = RevisionMap::new();
        stale.insert(high, "1".to_string());
        d.put(keys::PREVIOUS, DocValue::Map(prev));
        d.put(keys::STALE_PREV, DocValue::Map(stale));
        d.seal();

        assert_eq!(d.previous_ranges().len(), 1);
    }

    #[test]
    fn main_path_of_previous_documents() {
        let mut d = doc("3:p/foo/64-0-1/0");
        d.seal();
        assert_eq!(d.main_path().unwrap().as_str(), "/foo");

        let mut d = doc("2:p/64-0-1/1");
        d.seal();
        assert!(d.main_path().unwrap().is_root());

        let mut d = doc("2:/foo/bar");
        d.seal();
        assert_eq!(d.main_path().unwrap().as_str(), "/foo/bar");
    }

    #[test]
    fn split_doc_type_reads_deprecated_codes() {
        let mut d = doc("3:p/foo/64-0-1/0");
        d.put(keys::SD_TYPE, DocValue::Long(20));
        d.seal();
        assert_eq!(d.split_doc_type().unwrap(), SplitDocType::DefaultNoChild);
        assert!(d.is_split_document());
    }

    #[test]
    fn split_doc_type_fails_fast_on_unknown_code() {
        let mut d = doc("3:p/foo/64-0-1/0");
        d.put(keys::SD_TYPE, DocValue::Long(33));
        d.seal();
        assert!(d.split_doc_type().is_err());
    }

    #[test]
    fn last_rev_and_sweep_parse_placeholder_entries() {
        let mut d = doc("1:/a");
        let mut last = RevisionMap::new();
        last.insert(Revision::new_key(3), rev(77, 3).to_string());
        d.put(keys::LAST_REV, DocValue::Map(last));
        let mut sweep = RevisionMap::new();
        sweep.insert(Revision::new_key(3), rev(70, 3).to_string());
        d.put(keys::SWEEP_REV, DocValue::Map(sweep));
        d.seal();

        assert_eq!(d.last_rev().get(&3), Some(&rev(77, 3)));
        assert_eq!(d.sweep_revisions().revision(3), Some(&rev(70, 3)));
    }

    #[test]
    fn conflicts_for_reads_collision_markers() {
        let mut d = doc("1:/a");
        let mut collisions = RevisionMap::new();
        collisions.insert(rev(5, 1), rev(6, 2).to_string());
        collisions.insert(rev(7, 1), "true".to_string()); // legacy marker
        d.put(keys::COLLISIONS, DocValue::Map(collisions));
        d.seal();

        let conflicts = d.conflicts_for(&[rev(5, 1), rev(7, 1), rev(9, 1)]);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts.contains(&rev(6, 2)));
    }

    #[test]
    fn mark_up_to_date_is_monotonic() {
        let d = doc("1:/a");
        d.mark_up_to_date(u64::MAX);
        let t = d.last_check_time();
        d.mark_up_to_date(1);
        assert_eq!(d.last_check_time(), t);
    }

    #[test]
    fn null_document_identity() {
        assert!(NodeDocument::null().is_null());
        let d = doc("0:/");
        assert!(!d.is_null());
    }
}
