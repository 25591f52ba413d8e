//! Layer 2: Node paths and document ids
//!
//! Main documents are addressed as `<depth>:<path>`. Previous documents are
//! addressed as `<depth+2>:p/<main-path>/<high-revision>/<height>` and their
//! path strings begin with `p`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::MalformedDocument;
use super::revision::Revision;

/// An absolute, slash-separated node path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(String);

impl Path {
    pub const ROOT: &'static str = "/";

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn parse(s: impl Into<String>) -> Result<Self, MalformedDocument> {
        let s = s.into();
        if s == Self::ROOT {
            return Ok(Self(s));
        }
        if !s.starts_with('/') {
            return Err(MalformedDocument::new(format!(
                "path `{s}` is not absolute"
            )));
        }
        if s.ends_with('/') {
            return Err(MalformedDocument::new(format!(
                "path `{s}` has a trailing slash"
            )));
        }
        if s[1..].split('/').any(|seg| seg.is_empty()) {
            return Err(MalformedDocument::new(format!(
                "path `{s}` has an empty segment"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Number of segments; the root has depth 0.
    pub fn depth(&self) -> u32 {
        if self.is_root() {
            0
        } else {
            self.0.bytes().filter(|&b| b == b'/').count() as u32
        }
    }

    /// The ancestor `n` levels up; the root is its own ancestor.
    pub fn ancestor(&self, n: u32) -> Path {
        let mut path = self.0.as_str();
        for _ in 0..n {
            match path.rfind('/') {
                Some(0) | None => return Path::root(),
                Some(idx) => path = &path[..idx],
            }
        }
        Path(path.to_string())
    }

    /// True when any segment starts with `:` (an internal, non-observable
    /// part of the tree).
    pub fn is_hidden(&self) -> bool {
        !self.is_root() && self.0[1..].split('/').any(|seg| seg.starts_with(':'))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({:?})", self.0)
    }
}

impl FromStr for Path {
    type Err = MalformedDocument;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = MalformedDocument;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Path::parse(s)
    }
}

impl From<Path> for String {
    fn from(p: Path) -> String {
        p.0
    }
}

/// A document identifier: `<depth>:<path-ish>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// The id of the main document for the given path.
    pub fn from_path(path: &Path) -> Self {
        Self(format!("{}:{}", path.depth(), path))
    }

    /// The id of a previous document for the given main path, high revision
    /// and height.
    pub fn for_previous(main_path: &Path, high: &Revision, height: u32) -> Self {
        let prefix = if main_path.is_root() {
            String::new()
        } else {
            main_path.as_str().to_string()
        };
        Self(format!(
            "{}:p{}/{}/{}",
            main_path.depth() + 2,
            prefix,
            high.as_trunk(),
            height
        ))
    }

    pub fn parse(s: impl Into<String>) -> Result<Self, MalformedDocument> {
        let s = s.into();
        let Some((depth, _rest)) = s.split_once(':') else {
            return Err(MalformedDocument::new(format!(
                "document id `{s}` has no depth prefix"
            )));
        };
        if depth.is_empty() || !depth.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MalformedDocument::new(format!(
                "document id `{s}` has a non-numeric depth"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the depth prefix.
    pub fn path_part(&self) -> &str {
        self.0.split_once(':').map(|(_, rest)| rest).unwrap_or("")
    }

    /// True when this id addresses a previous document.
    pub fn is_previous(&self) -> bool {
        self.path_part().starts_with("p/")
    }

    /// The node path encoded in a main-document id.
    pub fn path(&self) -> Result<Path, MalformedDocument> {
        Path::parse(self.path_part())
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({:?})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_depth_and_ancestors() {
        let p = Path::parse("/a/b/c").unwrap();
        assert_eq!(p.depth(), 3);
        assert_eq!(p.ancestor(1).as_str(), "/a/b");
        assert_eq!(p.ancestor(3).as_str(), "/");
        assert_eq!(p.ancestor(9).as_str(), "/");
        assert_eq!(Path::root().depth(), 0);
    }

    #[test]
    fn path_rejects_relative_and_empty_segments() {
        assert!(Path::parse("a/b").is_err());
        assert!(Path::parse("/a//b").is_err());
        assert!(Path::parse("/a/").is_err());
        assert!(Path::parse("").is_err());
    }

    #[test]
    fn hidden_paths() {
        assert!(Path::parse("/a/:index/b").unwrap().is_hidden());
        assert!(Path::parse("/:hidden").unwrap().is_hidden());
        assert!(!Path::parse("/a/b").unwrap().is_hidden());
        assert!(!Path::root().is_hidden());
    }

    #[test]
    fn main_doc_ids() {
        assert_eq!(DocId::from_path(&Path::root()).as_str(), "0:/");
        let p = Path::parse("/foo/bar").unwrap();
        let id = DocId::from_path(&p);
        assert_eq!(id.as_str(), "2:/foo/bar");
        assert_eq!(id.path().unwrap(), p);
        assert!(!id.is_previous());
    }

    #[test]
    fn previous_doc_ids() {
        let high = Revision::new(0x64, 0, 1);
        let id = DocId::for_previous(&Path::parse("/foo").unwrap(), &high, 0);
        assert_eq!(id.as_str(), "3:p/foo/64-0-1/0");
        assert!(id.is_previous());

        let id = DocId::for_previous(&Path::root(), &high, 2);
        assert_eq!(id.as_str(), "2:p/64-0-1/2");
    }

    #[test]
    fn doc_id_parse_requires_depth() {
        assert!(DocId::parse("2:/a/b").is_ok());
        assert!(DocId::parse("/a/b").is_err());
        assert!(DocId::parse("x:/a").is_err());
    }
}
