//! Layer 6: Merged history views
//!
//! The logical view over a property spans the local document and every
//! previous document whose range could contain revisions of that property.
//! The views are pull-based and newest-first: callers stop as soon as they
//! have an answer, and previous documents are loaded on demand.

use std::collections::VecDeque;
use std::iter::Peekable;

use super::document::NodeDocument;
use super::keys;
use super::range::Range;
use super::revision::Revision;
use super::vector::RevisionVector;
use crate::store::{DocumentStore, PrevNoPropCache, StoreError};

pub(crate) type ChangeEntry = (Revision, String);
type Source<'a, T> = Box<dyn Iterator<Item = Result<T, StoreError>> + 'a>;
type Loader<'a> = Box<dyn FnOnce() -> Result<Vec<ChangeEntry>, StoreError> + 'a>;

/// Merge of descending sources into one descending stream. Store errors
/// surface as soon as a source hits one.
pub(crate) struct MergeDescending<'a, T> {
    sources: Vec<Peekable<Source<'a, T>>>,
    key: fn(&T) -> Revision,
    last: Option<Revision>,
    dedup: bool,
}

impl<'a, T> MergeDescending<'a, T> {
    pub(crate) fn new(sources: Vec<Source<'a, T>>, key: fn(&T) -> Revision, dedup: bool) -> Self {
        Self {
            sources: sources.into_iter().map(Iterator::peekable).collect(),
            key,
            last: None,
            dedup,
        }
    }
}

impl<'a, T> Iterator for MergeDescending<'a, T> {
    type Item = Result<T, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut best: Option<(usize, Revision)> = None;
            for (i, source) in self.sources.iter_mut().enumerate() {
                match source.peek() {
                    None => {}
                    Some(Err(_)) => return source.next(),
                    Some(Ok(item)) => {
                        let rev = (self.key)(item);
                        if best.map_or(true, |(_, b)| rev.stable_cmp(&b).is_gt()) {
                            best = Some((i, rev));
                        }
                    }
                }
            }
            let (i, rev) = best?;
            let item = self.sources[i].next();
            if self.dedup && self.last == Some(rev) {
                continue;
            }
            self.last = Some(rev);
            return item;
        }
    }
}

/// A chain of lazily loaded descending runs. Each loader is invoked only
/// when iteration reaches it; a caller that stops early never touches the
/// remaining previous documents.
struct DeferredChain<'a> {
    pending: VecDeque<Loader<'a>>,
    current: std::vec::IntoIter<ChangeEntry>,
}

impl<'a> DeferredChain<'a> {
    fn new(pending: VecDeque<Loader<'a>>) -> Self {
        Self {
            pending,
            current: Vec::new().into_iter(),
        }
    }
}

impl<'a> Iterator for DeferredChain<'a> {
    type Item = Result<ChangeEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.next() {
                return Some(Ok(entry));
            }
            let loader = self.pending.pop_front()?;
            match loader() {
                Ok(entries) => self.current = entries.into_iter(),
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

/// The logical, descending view over one property across the local document
/// and its previous documents.
pub struct ValueMap<'a> {
    doc: &'a NodeDocument,
    store: &'a dyn DocumentStore,
    property: &'a str,
}

impl<'a> ValueMap<'a> {
    /// Iterate entries newest-first. Previous documents load lazily, one
    /// range at a time.
    pub fn iter(&self) -> impl Iterator<Item = Result<(Revision, String), StoreError>> + 'a {
        let doc = self.doc;
        let store = self.store;
        let property = self.property;
        let mut sources: Vec<Source<'a, ChangeEntry>> = Vec::new();
        sources.push(Box::new(
            doc.local_map(property)
                .iter()
                .rev()
                .map(|(r, v)| Ok((*r, v.clone()))),
        ));
        for range in doc.previous_ranges().values() {
            let range = *range;
            let loader: Loader<'a> = Box::new(move || {
                let mut entries = Vec::new();
                if let Some(prev) = doc.previous_doc(store, &range)? {
                    prev.collect_value_map(store, property, &mut entries)?;
                    entries.sort_by(|a, b| b.0.stable_cmp(&a.0));
                }
                Ok(entries)
            });
            sources.push(Box::new(DeferredChain::new(VecDeque::from([loader]))));
        }
        MergeDescending::new(sources, |e| e.0, false)
    }

    /// Direct lookup of one revision entry.
    pub fn get(&self, revision: &Revision) -> Result<Option<String>, StoreError> {
        self.doc.value_map_get(self.store, self.property, revision)
    }

    pub fn contains(&self, revision: &Revision) -> Result<bool, StoreError> {
        self.doc
            .value_map_contains(self.store, self.property, revision)
    }
}

impl NodeDocument {
    /// The merged view over `property`, spanning previous documents.
    pub fn value_map<'a>(
        &'a self,
        store: &'a dyn DocumentStore,
        property: &'a str,
    ) -> ValueMap<'a> {
        ValueMap {
            doc: self,
            store,
            property,
        }
    }

    /// The merged `_deleted` map.
    pub fn deleted_map<'a>(&'a self, store: &'a dyn DocumentStore) -> ValueMap<'a> {
        self.value_map(store, keys::DELETED)
    }

    fn collect_value_map(
        &self,
        store: &dyn DocumentStore,
        property: &str,
        out: &mut Vec<ChangeEntry>,
    ) -> Result<(), StoreError> {
        for (r, v) in self.local_map(property).iter().rev() {
            out.push((*r, v.clone()));
        }
        for range in self.previous_ranges().values() {
            if let Some(prev) = self.previous_doc(store, range)? {
                prev.collect_value_map(store, property, out)?;
            }
        }
        Ok(())
    }

    pub(crate) fn value_map_get(
        &self,
        store: &dyn DocumentStore,
        property: &str,
        revision: &Revision,
    ) -> Result<Option<String>, StoreError> {
        if let Some(value) = self.local_map(property).get(revision) {
            return Ok(Some(value.clone()));
        }
        for range in self.previous_ranges().values() {
            if !range.includes(revision) {
                continue;
            }
            if let Some(prev) = self.previous_doc(store, range)? {
                if let Some(value) = prev.value_map_get(store, property, revision)? {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn value_map_contains(
        &self,
        store: &dyn DocumentStore,
        property: &str,
        revision: &Revision,
    ) -> Result<bool, StoreError> {
        Ok(self.value_map_get(store, property, revision)?.is_some())
    }

    /// All changes of `property` back to `min` (exclusive), newest first,
    /// committed or not. Previous documents are consulted only when their
    /// range reaches past `min`.
    pub fn get_changes<'a>(
        &'a self,
        store: &'a dyn DocumentStore,
        property: &'a str,
        min: &RevisionVector,
    ) -> Result<impl Iterator<Item = Result<Revision, StoreError>> + 'a, StoreError> {
        let min = min.clone();
        let mut sources: Vec<Source<'a, Revision>> = Vec::new();
        {
            let min = min.clone();
            sources.push(Box::new(
                self.local_map(property)
                    .keys()
                    .rev()
                    .take_while(move |r| min.is_revision_newer(*r))
                    .copied()
                    .map(Ok),
            ));
        }
        for range in self.previous_ranges().values() {
            if !min.is_revision_newer(&range.high) {
                continue;
            }
            if let Some(prev) = self.previous_doc(store, range)? {
                let min = min.clone();
                let mut entries = Vec::new();
                prev.collect_value_map(store, property, &mut entries)?;
                entries.sort_by(|a, b| b.0.stable_cmp(&a.0));
                sources.push(Box::new(
                    entries
                        .into_iter()
                        .map(|(r, _)| r)
                        .take_while(move |r| min.is_revision_newer(r))
                        .map(Ok),
                ));

            }
        }
        Ok(MergeDescending::new(sources, |r| *r, true))
    }

    /// Revisions of all changes performed on this document: every
    /// `_revisions` and `_commitRoot` entry including previous documents,
    /// newest first.
    pub fn get_all_changes<'a>(
        &'a self,
        store: &'a dyn DocumentStore,
    ) -> Result<impl Iterator<Item = Result<Revision, StoreError>> + 'a, StoreError> {
        let empty = RevisionVector::new();
        let sources: Vec<Source<'a, Revision>> = vec![
            Box::new(self.get_changes(store, keys::REVISIONS, &empty)?),
            Box::new(self.get_changes(store, keys::COMMIT_ROOT, &empty)?),
        ];
        Ok(MergeDescending::new(sources, |r| *r, true))
    }

    /// All changes of `property` visible from `read`, newest first,
    /// committed or not. With a `PrevNoPropCache`, previous-document
    /// subtrees known to hold no revisions for `property` are skipped, and
    /// a completed negative scan records that fact.
    pub fn get_visible_changes<'a>(
        &'a self,
        store: &'a dyn DocumentStore,
        property: &'a str,
        read: &RevisionVector,
        cache: Option<&'a PrevNoPropCache>,
    ) -> impl Iterator<Item = Result<(Revision, String), StoreError>> + 'a {
        let mut sources: Vec<Source<'a, ChangeEntry>> = Vec::new();
        {
            let read = read.clone();
            sources.push(Box::new(
                self.local_map(property)
                    .iter()
                    .rev()
                    .filter(move |(r, _)| !read.is_revision_newer(r))
                    .map(|(r, v)| Ok((*r, v.clone()))),
            ));
        }
        for r in read.iter() {
            self.collect_visible_previous_changes(store, property, r, cache, &mut sources);
        }
        MergeDescending::new(sources, |e| e.0, false)
    }

    /// Add the previous-document changes visible from the single
    /// read revision `read_rev` as lazily loaded sources: the ranges of that
    /// writer are batched into non-overlapping descending runs, and each run
    /// becomes one chained source.
    fn collect_visible_previous_changes<'a>(
        &'a self,
        store: &'a dyn DocumentStore,
        property: &'a str,
        read_rev: &Revision,
        cache: Option<&'a PrevNoPropCache>,
        sources: &mut Vec<Source<'a, ChangeEntry>>,
    ) {
        let mut ranges: Vec<Range> = self
            .previous_ranges()
            .values()
            .filter(|r| {
                r.low.writer_id() == read_rev.writer_id()
                    && read_rev.compare_revision_time(&r.low).is_ge()
            })
            .copied()
            .collect();
        let read = RevisionVector::from_revisions([*read_rev]);
        while !ranges.is_empty() {
            // batches of non-overlapping ranges, each descending
            let mut batch = Vec::new();
            let mut previous: Option<Range> = None;
            ranges.retain(|r| {
                let fits = previous
                    .map_or(true, |p| r.high.compare_revision_time(&p.low).is_lt());
                if fits {
                    batch.push(*r);
                    previous = Some(*r);
                }
                !fits
            });
            let loaders: VecDeque<Loader<'a>> = batch
                .into_iter()
                .map(|range| {
                    let read = read.clone();
                    let loader: Loader<'a> = Box::new(move || {
                        self.load_visible_range(store, property, &range, &read, cache)
                    });
                    loader
                })
                .collect();
            sources.push(Box::new(DeferredChain::new(loaders)));
        }
    }

    /// Load one previous range and collect its subtree's visible changes.
    /// When a cache is present and the whole subtree turned out to hold no
    /// revisions for the property at all, that negative result is recorded.
    fn load_visible_range(
        &self,
        store: &dyn DocumentStore,
        property: &str,
        range: &Range,
        read: &RevisionVector,
        cache: Option<&PrevNoPropCache>,
    ) -> Result<Vec<ChangeEntry>, StoreError> {
        let cache_key = match cache {
            Some(cache) => {
                let key = PrevNoPropCache::key(property, &self.previous_doc_id(range)?);
                if cache.contains(&key) {
                    tracing::trace!("empty changes cache hit for {key}");
                    return Ok(Vec::new());
                }
                Some(key)
            }
            None => None,
        };
        let Some(prev) = self.previous_doc(store, range)? else {
            // might be a race with a concurrent split; do not cache
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        let mut prop_rev_found = false;
        prev.collect_visible_changes(store, property, read, &mut entries, &mut prop_rev_found)?;
        if let (Some(cache), Some(key)) = (cache, cache_key) {
            if !prop_rev_found {
                tracing::debug!("caching empty changes for {key}");
                cache.put(key);
            }
        }
        entries.sort_by(|a, b| b.0.stable_cmp(&a.0));
        Ok(entries)
    }

    fn collect_visible_changes(
        &self,
        store: &dyn DocumentStore,
        property: &str,
        read: &RevisionVector,
        out: &mut Vec<ChangeEntry>,
        prop_rev_found: &mut bool,
    ) -> Result<(), StoreError> {
        let local = self.local_map(property);
        if !local.is_empty() {
            *prop_rev_found = true;
            out.extend(
                local
                    .iter()
                    .rev()
                    .filter(|(r, _)| !read.is_revision_newer(r))
                    .map(|(r, v)| (*r, v.clone())),
            );
        }
        for read_rev in read.iter() {
            for range in self.previous_ranges().values() {
                if range.low.writer_id() != read_rev.writer_id()
                    || read_rev.compare_revision_time(&range.low).is_lt()
                {
                    continue;
                }
                if let Some(prev) = self.previous_doc(store, range)? {
                    prev.collect_visible_changes(store, property, read, out, prop_rev_found)?;
                }
            }
        }
        Ok(())
    }
}
