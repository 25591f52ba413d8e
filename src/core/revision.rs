//! Layer 0: Revision identifiers
//!
//! A revision is the ordering primitive of the store: one per commit and
//! writer, totally ordered by the stable order.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::MalformedRevision;

/// Identifier of a participating writer (cluster member).
pub type WriterId = u32;

/// A commit identifier: `(timestamp_ms, counter, writer_id)` plus a branch
/// flag.
///
/// The natural order is the **stable order** `(timestamp, counter, writer)`,
/// with the branch flag as the final tiebreak so that `Ord` stays consistent
/// with `Eq`. Stored map keys never carry the branch flag, which makes map
/// iteration order the stable order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision {
    timestamp: u64,
    counter: u32,
    writer_id: WriterId,
    branch: bool,
}

impl Revision {
    pub fn new(timestamp: u64, counter: u32, writer_id: WriterId) -> Self {
        Self {
            timestamp,
            counter,
            writer_id,
            branch: false,
        }
    }

    pub fn new_branch(timestamp: u64, counter: u32, writer_id: WriterId) -> Self {
        Self {
            timestamp,
            counter,
            writer_id,
            branch: true,
        }
    }

    /// The `(0, 0, writer)` placeholder revision used as the stored key of
    /// `_lastRev` and `_sweepRev` entries. Preserved verbatim for
    /// compatibility with deployed data.
    pub fn new_key(writer_id: WriterId) -> Self {
        Self::new(0, 0, writer_id)
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn writer_id(&self) -> WriterId {
        self.writer_id
    }

    pub fn is_branch(&self) -> bool {
        self.branch
    }

    /// The same revision with the branch flag cleared.
    pub fn as_trunk(&self) -> Self {
        Self {
            branch: false,
            ..*self
        }
    }

    /// The same revision with the branch flag set.
    pub fn as_branch(&self) -> Self {
        Self {
            branch: true,
            ..*self
        }
    }

    /// Compare by `(timestamp, counter)` only, ignoring the writer.
    pub fn compare_revision_time(&self, other: &Revision) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.counter.cmp(&other.counter))
    }

    /// The stable order `(timestamp, counter, writer)`, ignoring the branch
    /// flag. This is the order every revision-keyed map iterates in.
    pub fn stable_cmp(&self, other: &Revision) -> Ordering {
        self.compare_revision_time(other)
            .then_with(|| self.writer_id.cmp(&other.writer_id))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.branch {
            write!(f, "b")?;
        }
        write!(
            f,
            "{:x}-{:x}-{:x}",
            self.timestamp, self.counter, self.writer_id
        )
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self)
    }
}

impl FromStr for Revision {
    type Err = MalformedRevision;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason| MalformedRevision {
            raw: s.to_string(),
            reason,
        };
        let (branch, rest) = match s.strip_prefix('b') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut parts = rest.split('-');
        let ts = parts.next().ok_or_else(|| malformed("missing timestamp"))?;
        let counter = parts.next().ok_or_else(|| malformed("missing counter"))?;
        let writer = parts.next().ok_or_else(|| malformed("missing writer id"))?;
        if parts.next().is_some() {
            return Err(malformed("trailing input"));
        }
        if ts.is_empty() || counter.is_empty() || writer.is_empty() {
            return Err(malformed("empty component"));
        }
        let timestamp =
            u64::from_str_radix(ts, 16).map_err(|_| malformed("timestamp is not hex"))?;
        let counter =
            u32::from_str_radix(counter, 16).map_err(|_| malformed("counter is not hex"))?;
        let writer_id =
            u32::from_str_radix(writer, 16).map_err(|_| malformed("writer id is not hex"))?;
        Ok(Self {
            timestamp,
            counter,
            writer_id,
            branch,
        })
    }
}

impl Serialize for Revision {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        for raw in ["18f3a2c4e10-0-1", "0-0-1", "b18f3a2c4e10-2a-ff"] {
            let rev: Revision = raw.parse().unwrap();
            assert_eq!(rev.to_string(), raw);
        }
    }

    #[test]
    fn parse_rejects_malformed_input() {
        for raw in [
            "",
            "b",
            "123",
            "1-2",
            "1-2-3-4",
            "x-0-1",
            "1--1",
            "1-0-zz",
            "B1-0-1",
        ] {
            assert!(raw.parse::<Revision>().is_err(), "{raw:?} must not parse");
        }
    }

    #[test]
    fn stable_order_is_timestamp_counter_writer() {
        let a = Revision::new(1, 0, 2);
        let b = Revision::new(1, 1, 1);
        let c = Revision::new(2, 0, 1);
        assert_eq!(a.stable_cmp(&b), Ordering::Less);
        assert_eq!(b.stable_cmp(&c), Ordering::Less);

        let d = Revision::new(1, 0, 1);
        assert_eq!(d.stable_cmp(&a), Ordering::Less);
    }

    #[test]
    fn branch_flag_does_not_change_stable_order() {
        let r = Revision::new(5, 1, 3);
        assert_eq!(r.stable_cmp(&r.as_branch()), Ordering::Equal);
        assert_ne!(r, r.as_branch());
        assert_eq!(r.as_branch().as_trunk(), r);
    }
}
