//! In-memory document store.
//!
//! Reference implementation of the conditional map-level update semantics.
//! Used by tests; a production backend lives outside this crate.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::core::document::{DocValue, NodeDocument};
use crate::core::path::DocId;
use crate::core::update::{Operation, Scalar, UpdateOp};

use super::{DocumentStore, StoreError};

#[derive(Default)]
pub struct MemoryDocumentStore {
    nodes: RwLock<BTreeMap<DocId, Arc<NodeDocument>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    pub fn ids(&self) -> Vec<DocId> {
        self.read_lock().keys().cloned().collect()
    }

    /// Apply a batch of update operations in order, stopping at the first
    /// failure.
    pub fn apply_all(&self, ops: &[UpdateOp]) -> Result<(), StoreError> {
        for op in ops {
            self.find_and_update(op)?;
        }
        Ok(())
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<DocId, Arc<NodeDocument>>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn conditions_met(doc: Option<&NodeDocument>, op: &UpdateOp) -> bool {
        op.changes().iter().all(|(key, change)| match change {
            Operation::Equals(expected) => {
                let Some(rev) = key.revision() else {
                    return false;
                };
                doc.map(|d| d.local_map(key.name()).get(rev) == Some(expected))
                    .unwrap_or(false)
            }
            _ => true,
        })
    }

    fn apply(doc: &mut NodeDocument, op: &UpdateOp) {
        for (key, change) in op.changes() {
            match change {
                Operation::Equals(_) => {}
                Operation::Set(scalar) => {
                    let value = match scalar {
                        Scalar::Bool(v) => DocValue::Bool(*v),
                        Scalar::Long(v) => DocValue::Long(*v),
                        Scalar::String(v) => DocValue::String(v.clone()),
                    };
                    doc.put(key.name(), value);
                }
                Operation::Max(value) => {
                    let current = doc.get(key.name()).and_then(DocValue::as_long);
                    let next = current.map_or(*value, |c| c.max(*value));
                    doc.put(key.name(), DocValue::Long(next));
                }
                Operation::SetMapEntry(value) => {
                    let Some(rev) = key.revision() else {
                        continue;
                    };
                    let mut map = doc
                        .get(key.name())
                        .and_then(DocValue::as_map)
                        .cloned()
                        .unwrap_or_default();
                    map.insert(*rev, value.clone());
                    doc.put(key.name(), DocValue::Map(map));
                }
                Operation::RemoveMapEntry | Operation::UnsetMapEntry => {
                    let Some(rev) = key.revision() else {
                        continue;
                    };
                    let mut map = doc
                        .get(key.name())
                        .and_then(DocValue::as_map)
                        .cloned()
                        .unwrap_or_default();
                    map.remove(rev);
                    doc.put(key.name(), DocValue::Map(map));
                }
            }
        }
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find(&self, id: &DocId) -> Result<Option<Arc<NodeDocument>>, StoreError> {
        Ok(self.read_lock().get(id).cloned())
    }

    fn find_and_update(&self, op: &UpdateOp) -> Result<Option<Arc<NodeDocument>>, StoreError> {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let before = nodes.get(op.id()).cloned();
        if before.is_none() && !op.is_new() {
            return Ok(None);
        }
        if !Self::conditions_met(before.as_deref(), op) {
            return Ok(None);
        }
        let mut doc = match &before {
            Some(existing) => existing.unsealed_clone(),
            None => NodeDocument::new(op.id().clone()),
        };
        Self::apply(&mut doc, op);
        doc.seal();
        nodes.insert(op.id().clone(), Arc::new(doc));
        Ok(before)
    }

    fn get_if_cached(&self, id: &DocId) -> Option<Arc<NodeDocument>> {
        self.read_lock().get(id).cloned()
    }

    fn invalidate_cache(&self, _id: &DocId) {
        // the backing map is the source of truth; nothing cached separately
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys;
    use crate::core::revision::Revision;

    fn id() -> DocId {
        DocId::parse("1:/x").unwrap()
    }

    fn rev(ts: u64) -> Revision {
        Revision::new(ts, 0, 1)
    }

    #[test]
    fn create_and_update_round_trip() {
        let store = MemoryDocumentStore::new();
        let mut op = UpdateOp::new_document(id());
        op.set_map_entry(keys::REVISIONS, rev(1), "c")
            .set_modified(rev(1));
        assert!(store.find_and_update(&op).unwrap().is_none());

        let doc = store.find(&id()).unwrap().unwrap();
        assert!(doc.is_sealed());
        assert_eq!(doc.local_revisions().get(&rev(1)).unwrap(), "c");
        assert_eq!(doc.modified(), Some(0));
    }

    #[test]
    fn update_on_missing_document_is_a_noop() {
        let store = MemoryDocumentStore::new();
        let mut op = UpdateOp::new(id());
        op.set_modified(rev(1));
        assert!(store.find_and_update(&op).unwrap().is_none());
        assert!(store.find(&id()).unwrap().is_none());
    }

    #[test]
    fn max_keeps_the_larger_value() {
        let store = MemoryDocumentStore::new();
        let mut op = UpdateOp::new_document(id());
        op.max(keys::MODIFIED_IN_SECS, 50);
        store.find_and_update(&op).unwrap();

        let mut op = UpdateOp::new(id());
        op.max(keys::MODIFIED_IN_SECS, 20);
        store.find_and_update(&op).unwrap();

        let doc = store.find(&id()).unwrap().unwrap();
        assert_eq!(doc.modified(), Some(50));
    }

    #[test]
    fn failed_precondition_changes_nothing() {
        let store = MemoryDocumentStore::new();
        let last = rev(10);
        let mut op = UpdateOp::new_document(id());
        op.set_last_rev(last);
        store.find_and_update(&op).unwrap();

        let mut op = UpdateOp::new(id());
        op.has_last_rev(rev(11)).set_modified(rev(12));
        assert!(store.find_and_update(&op).unwrap().is_none());
        let doc = store.find(&id()).unwrap().unwrap();
        assert_eq!(doc.modified(), None);

        let mut op = UpdateOp::new(id());
        op.has_last_rev(last).set_modified(rev(12));
        assert!(store.find_and_update(&op).unwrap().is_some());
    }

    #[test]
    fn remove_map_entry_deletes_one_entry() {
        let store = MemoryDocumentStore::new();
        let mut op = UpdateOp::new_document(id());
        op.set_map_entry("p", rev(1), "\"a\"")
            .set_map_entry("p", rev(2), "\"b\"");
        store.find_and_update(&op).unwrap();

        let mut op = UpdateOp::new(id());
        op.remove_map_entry("p", rev(1));
        store.find_and_update(&op).unwrap();

        let doc = store.find(&id()).unwrap().unwrap();
        assert!(doc.local_map("p").get(&rev(1)).is_none());
        assert!(doc.local_map("p").get(&rev(2)).is_some());
    }
}
