//! Layer 7: The resolved view of a node at a read point.

use std::collections::BTreeMap;

use super::path::Path;
use super::vector::RevisionVector;

/// A node as seen from one read revision: its visible property values and
/// the vector of last modifications that produced this view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeState {
    path: Path,
    read_revision: RevisionVector,
    properties: BTreeMap<String, String>,
    has_children: bool,
    last_revision: RevisionVector,
}

impl NodeState {
    pub(crate) fn new(
        path: Path,
        read_revision: RevisionVector,
        properties: BTreeMap<String, String>,
        has_children: bool,
        last_revision: RevisionVector,
    ) -> Self {
        Self {
            path,
            read_revision,
            properties,
            has_children,
            last_revision,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_revision(&self) -> &RevisionVector {
        &self.read_revision
    }

    /// Visible properties: unescaped name to JSON-encoded value.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// The JSON-encoded value of one property.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn has_children(&self) -> bool {
        self.has_children
    }

    /// When this node was last modified, as visible from the read revision.
    pub fn last_revision(&self) -> &RevisionVector {
        &self.last_revision
    }
}
