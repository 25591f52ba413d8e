//! System keys and normative constants of the document record.

/// Last time a document was modified, in 5-second resolution.
pub const MODIFIED_IN_SECS: &str = "_modified";

/// Commit bookkeeping: revision -> commit value.
pub const REVISIONS: &str = "_revisions";

/// Revision -> depth of the commit root document for that commit.
pub const COMMIT_ROOT: &str = "_commitRoot";

/// Revision -> "true"/"false" existence markers.
pub const DELETED: &str = "_deleted";

/// Set once the node has been deleted at least once.
pub const DELETED_ONCE: &str = "_deletedOnce";

/// Placeholder-keyed map of per-writer last modifications.
pub const LAST_REV: &str = "_lastRev";

/// Whether the node ever had child nodes.
pub const CHILDREN_FLAG: &str = "_children";

/// Explicit path of the node, overriding derivation from the id.
pub const PATH: &str = "_path";

/// Set when the node has a binary property.
pub const HAS_BINARY_FLAG: &str = "_bin";

/// High revision -> "low/height" entries pointing at previous documents.
pub const PREVIOUS: &str = "_prev";

/// High revision -> height of `_prev` entries that must be ignored.
pub const STALE_PREV: &str = "_stalePrev";

/// Revisions committed through a branch.
pub const BRANCH_COMMITS: &str = "_bc";

/// Placeholder-keyed per-writer sweep revisions.
pub const SWEEP_REV: &str = "_sweepRev";

/// Split document type tag, see `SplitDocType`.
pub const SD_TYPE: &str = "_sdType";

/// Upper bound (5-second resolution) on revisions in a previous document.
pub const SD_MAX_REV_TIME: &str = "_sdMaxRevTime";

/// Collision markers left by concurrent commit attempts.
pub const COLLISIONS: &str = "_collisions";

/// The lowest possible document id.
pub const MIN_ID_VALUE: &str = "0000000";

/// The highest possible document id (`;` sorts above `9` and `:`).
pub const MAX_ID_VALUE: &str = ";";

/// Value of `_bin` when the node has a binary property.
pub const HAS_BINARY_VAL: i64 = 1;

/// Number of revision entries in a local map that makes a document split.
pub const NUM_REVS_THRESHOLD: usize = 100;

/// Serialized size that forces a split regardless of revision count.
pub const DOC_SIZE_THRESHOLD: usize = 1024 * 1024;

/// Serialized size above which a document is a split candidate at all.
pub const SPLIT_CANDIDATE_THRESHOLD: usize = 8 * 1024;

/// Number of previous documents of the same height folded into one
/// intermediate document.
pub const PREV_SPLIT_FACTOR: usize = 10;

/// Resolution of `_modified` in seconds.
pub const MODIFIED_IN_SECS_RESOLUTION: u64 = 5;

/// Return time in seconds with 5 second resolution.
pub fn modified_in_secs(timestamp_ms: u64) -> i64 {
    let secs = timestamp_ms / 1000;
    (secs - secs % MODIFIED_IN_SECS_RESOLUTION) as i64
}

/// True when `key` names a user property rather than a system field.
///
/// Escaped property names starting with `__` are properties; a single
/// leading `_` marks the system namespace.
pub fn is_property_name(key: &str) -> bool {
    !key.starts_with('_') || key.starts_with("__")
}

/// Escape a user property name into its document key.
///
/// A leading `_` is doubled so the escaped form never collides with a
/// system key.
pub fn escape_property_name(name: &str) -> String {
    if let Some(rest) = name.strip_prefix('_') {
        format!("__{}", rest)
    } else {
        name.to_string()
    }
}

/// Inverse of [`escape_property_name`].
pub fn unescape_property_name(key: &str) -> String {
    if let Some(rest) = key.strip_prefix("__") {
        format!("_{}", rest)
    } else {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_in_secs_floors_to_resolution() {
        assert_eq!(modified_in_secs(0), 0);
        assert_eq!(modified_in_secs(4_999), 0);
        assert_eq!(modified_in_secs(5_000), 5);
        assert_eq!(modified_in_secs(23_456), 20);
    }

    #[test]
    fn property_names_are_disjoint_from_system_keys() {
        assert!(is_property_name("jcr:primaryType"));
        assert!(is_property_name("__hidden"));
        assert!(!is_property_name("_revisions"));
        assert!(!is_property_name("_prev"));
    }

    #[test]
    fn property_name_escaping_round_trips() {
        for name in ["title", "_private", "__weird", "a_b"] {
            let escaped = escape_property_name(name);
            assert!(is_property_name(&escaped), "{escaped} must stay a property");
            assert_eq!(unescape_property_name(&escaped), name);
        }
    }
}
