//! Layer 1: Revision vectors
//!
//! A snapshot of the store as seen by a reader: at most one revision per
//! writer. Read points and branch bases are revision vectors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::error::MalformedRevision;
use super::revision::{Revision, WriterId};

/// A set of revisions with at most one entry per writer, kept sorted by
/// writer id. Vectors almost always hold a handful of writers, hence the
/// inline storage.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct RevisionVector {
    revs: SmallVec<[Revision; 4]>,
}

impl RevisionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A vector holding exactly the given revisions. Later entries win for
    /// duplicate writer ids if newer.
    pub fn from_revisions(revs: impl IntoIterator<Item = Revision>) -> Self {
        let mut vector = Self::new();
        for r in revs {
            vector = vector.update(r);
        }
        vector
    }

    pub fn len(&self) -> usize {
        self.revs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revs.iter()
    }

    /// The entry for the given writer, if any.
    pub fn revision(&self, writer_id: WriterId) -> Option<&Revision> {
        self.revs
            .binary_search_by_key(&writer_id, |r| r.writer_id())
            .ok()
            .map(|idx| &self.revs[idx])
    }

    /// A copy with the writer's entry replaced when `r` is newer (stable
    /// order) than the current entry, or inserted when missing.
    #[must_use]
    pub fn update(&self, r: Revision) -> Self {
        let mut revs = self.revs.clone();
        match revs.binary_search_by_key(&r.writer_id(), |e| e.writer_id()) {
            Ok(idx) => {
                if revs[idx].stable_cmp(&r).is_lt() {
                    revs[idx] = r;
                }
            }
            Err(idx) => revs.insert(idx, r),
        }
        Self { revs }
    }

    /// A copy without the entry for the given writer.
    #[must_use]
    pub fn remove(&self, writer_id: WriterId) -> Self {
        let mut revs = self.revs.clone();
        if let Ok(idx) = revs.binary_search_by_key(&writer_id, |e| e.writer_id()) {
            revs.remove(idx);
        }
        Self { revs }
    }

    /// True iff `r` is newer than this vector's entry for `r`'s writer, or
    /// the vector has no entry for that writer at all. In other words: `r`
    /// is not covered by this read point.
    pub fn is_revision_newer(&self, r: &Revision) -> bool {
        match self.revision(r.writer_id()) {
            Some(entry) => entry.stable_cmp(r).is_lt(),
            None => true,
        }
    }

    /// True when any entry carries the branch flag.
    pub fn is_branch(&self) -> bool {
        self.revs.iter().any(|r| r.is_branch())
    }

    /// The branch-flagged entry of a branch-tagged vector.
    pub fn branch_revision(&self) -> Option<&Revision> {
        self.revs.iter().find(|r| r.is_branch())
    }

    /// The vector with every branch flag cleared.
    #[must_use]
    pub fn base(&self) -> Self {
        Self {
            revs: self.revs.iter().map(|r| r.as_trunk()).collect(),
        }
    }
}

impl FromIterator<Revision> for RevisionVector {
    fn from_iter<T: IntoIterator<Item = Revision>>(iter: T) -> Self {
        Self::from_revisions(iter)
    }
}

impl<'a> IntoIterator for &'a RevisionVector {
    type Item = &'a Revision;
    type IntoIter = std::slice::Iter<'a, Revision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revs.iter()
    }
}

impl fmt::Display for RevisionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.revs.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RevisionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionVector({})", self)
    }
}

impl FromStr for RevisionVector {
    type Err = MalformedRevision;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::new());
        }
        let mut vector = Self::new();
        for part in s.split(',') {
            vector = vector.update(part.parse()?);
        }
        Ok(vector)
    }
}

impl Serialize for RevisionVector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RevisionVector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(ts: u64, writer: WriterId) -> Revision {
        Revision::new(ts, 0, writer)
    }

    #[test]
    fn update_keeps_newest_per_writer() {
        let v = RevisionVector::new().update(rev(1, 1)).update(rev(5, 2));
        let v = v.update(rev(3, 1));
        assert_eq!(v.revision(1), Some(&rev(3, 1)));

        // older update is a no-op
        let v = v.update(rev(2, 1));
        assert_eq!(v.revision(1), Some(&rev(3, 1)));
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn remove_drops_the_writer_entry() {
        let v = RevisionVector::from_revisions([rev(1, 1), rev(2, 2)]);
        let v = v.remove(1);
        assert!(v.revision(1).is_none());
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn is_revision_newer_covers_missing_writers() {
        let v = RevisionVector::from_revisions([rev(5, 1)]);
        assert!(!v.is_revision_newer(&rev(5, 1)));
        assert!(!v.is_revision_newer(&rev(4, 1)));
        assert!(v.is_revision_newer(&rev(6, 1)));
        assert!(v.is_revision_newer(&rev(1, 9)));
    }

    #[test]
    fn branch_helpers() {
        let trunk = rev(1, 1);
        let branch = Revision::new_branch(2, 0, 1);
        let v = RevisionVector::from_revisions([branch, rev(3, 2)]);
        assert!(v.is_branch());
        assert_eq!(v.branch_revision(), Some(&branch));

        let base = v.base();
        assert!(!base.is_branch());
        assert_eq!(base.revision(1), Some(&branch.as_trunk()));

        let v = RevisionVector::from_revisions([trunk]);
        assert!(v.branch_revision().is_none());
    }

    #[test]
    fn string_form_round_trips() {
        let v = RevisionVector::from_revisions([
            rev(0x1a, 1),
            Revision::new_branch(0x2b, 1, 2),
        ]);
        let s = v.to_string();
        assert_eq!(s, "1a-0-1,b2b-1-2");
        let parsed: RevisionVector = s.parse().unwrap();
        assert_eq!(parsed, v);
        assert_eq!("".parse::<RevisionVector>().unwrap(), RevisionVector::new());
    }
}
