//! Round-trip properties of the document text form.

mod fixtures;

use std::sync::Arc;

use fixtures::{node_id, rev, update};
use sediment::{DocumentStore, MemoryDocumentStore, NodeDocument, Range};

#[test]
fn documents_round_trip_through_their_text_form() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/a/b");
    let range = Range::new(rev(9, 2), rev(2, 2), 0).unwrap();
    update(&store, &id, |op| {
        op.set_revision(rev(10, 1), &"c".parse().unwrap())
            .set_revision(rev(12, 2), &"c-13-0-2".parse().unwrap())
            .set_deleted(rev(10, 1), false)
            .set_map_entry("p", rev(10, 1), "\"a\"")
            .set_map_entry("__internal", rev(10, 1), "\"b\"")
            .set_children_flag(true)
            .set_has_binary()
            .set_modified(rev(10, 1))
            .set_last_rev(rev(10, 1))
            .set_sweep_rev(rev(10, 1))
            .set_branch_commit(rev(12, 2))
            .set_previous(&range)
            .set_stale_previous(range.high, range.height)
            .add_collision(rev(11, 3), rev(12, 1));
    });

    let doc = store.find(&id).unwrap().unwrap();
    let text = doc.as_string();
    let parsed = NodeDocument::from_string(&text).unwrap();
    assert_eq!(&parsed, doc.as_ref());
    assert_eq!(parsed.as_string(), text);
    assert!(parsed.is_sealed());
    assert!(parsed.has_children());
    assert!(parsed.has_binary());
}

#[test]
fn parsed_documents_expose_the_same_views() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/a");
    update(&store, &id, |op| {
        op.set_revision(rev(1, 1), &"c".parse().unwrap())
            .set_deleted(rev(1, 1), false)
            .set_map_entry("p", rev(1, 1), "\"x\"");
    });
    let doc = store.find(&id).unwrap().unwrap();
    let parsed = NodeDocument::from_string(&doc.as_string()).unwrap();

    assert_eq!(parsed.local_revisions(), doc.local_revisions());
    assert_eq!(parsed.local_deleted(), doc.local_deleted());
    assert_eq!(
        parsed.property_names().collect::<Vec<_>>(),
        doc.property_names().collect::<Vec<_>>()
    );
}
