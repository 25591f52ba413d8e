//! Shared fixtures: an in-memory store plus a revision context that
//! resolves commit values from the documents themselves.
#![allow(dead_code)]

use std::sync::Arc;

use sediment::{
    Branches, CommitValue, DocId, DocumentStore, MemoryDocumentStore, NodeDocument, Path,
    Revision, RevisionContext, RevisionVector, StoreError, UpdateOp, WriterId,
};

pub fn rev(ts: u64, writer: WriterId) -> Revision {
    Revision::new(ts, 0, writer)
}

pub fn vector(revs: impl IntoIterator<Item = Revision>) -> RevisionVector {
    RevisionVector::from_revisions(revs)
}

pub fn node_id(path: &str) -> DocId {
    DocId::from_path(&Path::parse(path).unwrap())
}

/// Create or update a document through the store.
pub fn update(store: &MemoryDocumentStore, id: &DocId, build: impl FnOnce(&mut UpdateOp)) {
    let mut op = UpdateOp::new_document(id.clone());
    build(&mut op);
    store.find_and_update(&op).expect("update must apply");
}

pub struct TestContext {
    pub store: Arc<MemoryDocumentStore>,
    pub head: RevisionVector,
    pub writer_id: WriterId,
    pub branches: Branches,
}

impl TestContext {
    pub fn new(store: Arc<MemoryDocumentStore>) -> Self {
        Self {
            store,
            head: RevisionVector::new(),
            writer_id: 1,
            branches: Branches::new(),
        }
    }

    pub fn with_head(mut self, head: RevisionVector) -> Self {
        self.head = head;
        self
    }

    pub fn with_branches(mut self, branches: Branches) -> Self {
        self.branches = branches;
        self
    }
}

impl RevisionContext for TestContext {
    fn head_revision(&self) -> RevisionVector {
        self.head.clone()
    }

    fn writer_id(&self) -> WriterId {
        self.writer_id
    }

    fn branches(&self) -> &Branches {
        &self.branches
    }

    fn commit_value(
        &self,
        revision: &Revision,
        doc: &NodeDocument,
    ) -> Result<Option<CommitValue>, StoreError> {
        doc.resolve_commit_value(self.store.as_ref(), revision)
    }
}
