//! Layer 2: Commit values
//!
//! The commit state of a revision as recorded under `_revisions`. The wire
//! form is stringly typed; it is parsed once at the store boundary and
//! carried as this tagged variant everywhere inside the crate.

use std::fmt;
use std::str::FromStr;

use super::error::MalformedRevision;
use super::revision::Revision;
use super::vector::RevisionVector;

/// Decoded commit value of a revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitValue {
    /// `"c"`: committed on trunk at the change revision itself.
    Committed,
    /// `"c-<rev>"`: branch commit, merged into trunk at the given revision.
    CommittedBranch(Revision),
    /// A branch-tagged revision vector: branch commit, not yet merged.
    ///
    /// Read as a vector rather than a single revision to tolerate historic
    /// multi-entry values.
    Branch(RevisionVector),
}

impl CommitValue {
    /// True for trunk commits and merged branch commits.
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitValue::Committed | CommitValue::CommittedBranch(_))
    }

    /// The revision at which the change with revision `r` became part of a
    /// commit: `r` itself for trunk commits, the merge revision for merged
    /// branch commits, and the branch-tagged `r` for unmerged branch
    /// commits.
    pub fn resolve_commit_revision(&self, r: Revision) -> Revision {
        match self {
            CommitValue::Committed => r,
            CommitValue::CommittedBranch(merge) => *merge,
            CommitValue::Branch(_) => r.as_branch(),
        }
    }

    /// The base revision vector of an unmerged branch commit.
    pub fn branch_base(&self) -> Option<&RevisionVector> {
        match self {
            CommitValue::Branch(base) => Some(base),
            _ => None,
        }
    }
}

impl fmt::Display for CommitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitValue::Committed => write!(f, "c"),
            CommitValue::CommittedBranch(merge) => write!(f, "c-{}", merge),
            CommitValue::Branch(base) => write!(f, "{}", base),
        }
    }
}

impl FromStr for CommitValue {
    type Err = MalformedRevision;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "c" {
            return Ok(CommitValue::Committed);
        }
        if let Some(rest) = s.strip_prefix("c-") {
            return Ok(CommitValue::CommittedBranch(rest.parse()?));
        }
        let vector: RevisionVector = s.parse()?;
        if vector.is_empty() {
            return Err(MalformedRevision {
                raw: s.to_string(),
                reason: "empty commit value",
            });
        }
        Ok(CommitValue::Branch(vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trunk_commit_resolves_to_itself() {
        let cv: CommitValue = "c".parse().unwrap();
        assert!(cv.is_committed());
        let r = Revision::new(7, 0, 1);
        assert_eq!(cv.resolve_commit_revision(r), r);
        assert_eq!(cv.to_string(), "c");
    }

    #[test]
    fn merged_branch_commit_resolves_to_merge_revision() {
        let cv: CommitValue = "c-9-0-2".parse().unwrap();
        assert!(cv.is_committed());
        let r = Revision::new(7, 0, 2);
        assert_eq!(cv.resolve_commit_revision(r), Revision::new(9, 0, 2));
    }

    #[test]
    fn unmerged_branch_commit_is_not_committed() {
        let cv: CommitValue = "b5-0-1".parse().unwrap();
        assert!(!cv.is_committed());
        let r = Revision::new(7, 0, 1);
        assert_eq!(cv.resolve_commit_revision(r), r.as_branch());
        assert!(cv.branch_base().unwrap().is_branch());
    }

    #[test]
    fn malformed_commit_values_are_rejected() {
        assert!("".parse::<CommitValue>().is_err());
        assert!("c-".parse::<CommitValue>().is_err());
        assert!("commit".parse::<CommitValue>().is_err());
    }
}
