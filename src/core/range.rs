//! Layer 3: Previous-document ranges
//!
//! A `_prev` entry maps a high revision to `"low/height"`. The range covers
//! every revision of the high revision's writer between low and high, and
//! identifies one previous document holding that slice of history.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};

use serde::{Deserialize, Serialize};

use super::error::MalformedDocument;
use super::revision::Revision;

/// A revision range `(high, low, height)` of a single writer. Height 0 marks
/// a leaf previous document; every intermediate level adds 1.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub high: Revision,
    pub low: Revision,
    pub height: u32,
}

impl Range {
    pub fn new(high: Revision, low: Revision, height: u32) -> Result<Self, MalformedDocument> {
        if high.writer_id() != low.writer_id() {
            return Err(MalformedDocument::new(format!(
                "range {high}/{low} spans writers"
            )));
        }
        if high.stable_cmp(&low).is_lt() {
            return Err(MalformedDocument::new(format!(
                "range high {high} is older than low {low}"
            )));
        }
        Ok(Self { high, low, height })
    }

    /// Decode a `_prev` entry: key is the high revision, value is
    /// `"low/height"`.
    pub fn from_entry(high: Revision, value: &str) -> Result<Self, MalformedDocument> {
        let Some((low, height)) = value.rsplit_once('/') else {
            return Err(MalformedDocument::new(format!(
                "previous entry `{value}` has no height"
            )));
        };
        let low: Revision = low
            .parse()
            .map_err(|e| MalformedDocument::new(format!("previous entry low: {e}")))?;
        let height: u32 = height
            .parse()
            .map_err(|_| MalformedDocument::new(format!("previous entry height `{height}`")))?;
        Self::new(high, low, height)
    }

    /// The `_prev` entry value for this range.
    pub fn entry_value(&self) -> String {
        format!("{}/{}", self.low, self.height)
    }

    /// True iff `r` belongs to this range: same writer and
    /// `low <= r <= high` in stable order.
    pub fn includes(&self, r: &Revision) -> bool {
        r.writer_id() == self.high.writer_id()
            && self.low.stable_cmp(r).is_le()
            && r.stable_cmp(&self.high).is_le()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.high, self.entry_value())
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Range({})", self)
    }
}

/// The effective index of previous documents: `_prev` minus `_stalePrev`,
/// keyed by high revision and read newest-first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreviousIndex {
    ranges: BTreeMap<Revision, Range>,
}

impl PreviousIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, range: Range) {
        self.ranges.insert(range.high, range);
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn get(&self, high: &Revision) -> Option<&Range> {
        self.ranges.get(high)
    }

    /// All ranges, descending by high revision (newest first).
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &Range> {
        self.ranges.values().rev()
    }

    /// All high revisions, descending (newest first).
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &Revision> {
        self.ranges.keys().rev()
    }

    /// The range with the largest high that is `<= r` in stable order.
    pub fn floor_entry(&self, r: &Revision) -> Option<&Range> {
        self.ranges.range(..=*r).next_back().map(|(_, range)| range)
    }

    /// All ranges whose high is strictly newer than `r`, descending.
    pub fn head_map(&self, r: &Revision) -> impl DoubleEndedIterator<Item = &Range> {
        self.ranges
            .range((Excluded(*r), Unbounded))
            .rev()
            .map(|(_, range)| range)
    }
}

impl<'a> IntoIterator for &'a PreviousIndex {
    type Item = (&'a Revision, &'a Range);
    type IntoIter = std::iter::Rev<btree_map::Iter<'a, Revision, Range>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(ts: u64, writer: u32) -> Revision {
        Revision::new(ts, 0, writer)
    }

    #[test]
    fn entry_round_trips() {
        let range = Range::new(rev(100, 1), rev(10, 1), 0).unwrap();
        let parsed = Range::from_entry(range.high, &range.entry_value()).unwrap();
        assert_eq!(parsed, range);
    }

    #[test]
    fn range_rejects_mixed_writers_and_inverted_bounds() {
        assert!(Range::new(rev(100, 1), rev(10, 2), 0).is_err());
        assert!(Range::new(rev(10, 1), rev(100, 1), 0).is_err());
        assert!(Range::from_entry(rev(100, 1), "10-0-1").is_err());
        assert!(Range::from_entry(rev(100, 1), "10-0-1/x").is_err());
    }

    #[test]
    fn includes_is_writer_scoped() {
        let range = Range::new(rev(100, 1), rev(10, 1), 0).unwrap();
        assert!(range.includes(&rev(10, 1)));
        assert!(range.includes(&rev(55, 1)));
        assert!(range.includes(&rev(100, 1)));
        assert!(!range.includes(&rev(9, 1)));
        assert!(!range.includes(&rev(101, 1)));
        assert!(!range.includes(&rev(55, 2)));
    }

    #[test]
    fn index_iterates_newest_first() {
        let mut index = PreviousIndex::new();
        index.insert(Range::new(rev(100, 1), rev(50, 1), 0).unwrap());
        index.insert(Range::new(rev(40, 1), rev(10, 1), 0).unwrap());
        index.insert(Range::new(rev(70, 2), rev(60, 2), 0).unwrap());
        let highs: Vec<_> = index.values().map(|r| r.high).collect();
        assert_eq!(highs, vec![rev(100, 1), rev(70, 2), rev(40, 1)]);
    }

    #[test]
    fn floor_entry_and_head_map() {
        let mut index = PreviousIndex::new();
        index.insert(Range::new(rev(100, 1), rev(50, 1), 0).unwrap());
        index.insert(Range::new(rev(40, 1), rev(10, 1), 0).unwrap());

        assert_eq!(index.floor_entry(&rev(40, 1)).unwrap().high, rev(40, 1));
        assert_eq!(index.floor_entry(&rev(45, 1)).unwrap().high, rev(40, 1));
        assert!(index.floor_entry(&rev(5, 1)).is_none());

        let above: Vec<_> = index.head_map(&rev(40, 1)).map(|r| r.high).collect();
        assert_eq!(above, vec![rev(100, 1)]);
        assert!(index.head_map(&rev(100, 1)).next().is_none());
    }
}
