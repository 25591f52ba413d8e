//! Split emission and the read path across previous documents.

mod fixtures;

use std::sync::Arc;

use fixtures::{node_id, rev, update, vector, TestContext};
use sediment::{DocId, DocumentStore, MemoryDocumentStore, Path, Range, SplitDocType};

#[test]
fn split_emission_and_read_after_split() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/content");
    let revs: Vec<_> = (1..=100).map(|i| rev(i, 1)).collect();
    update(&store, &id, |op| {
        op.set_deleted(revs[0], false);
        for (i, r) in revs.iter().enumerate() {
            op.set_revision(*r, &"c".parse().unwrap())
                .set_map_entry("q", *r, &format!("\"v{}\"", i + 1));
        }
    });

    let head = vector([rev(200, 1)]);
    let ctx = TestContext::new(store.clone()).with_head(head.clone());
    let doc = store.find(&id).unwrap().unwrap();

    let ops = doc.split(&ctx, &head).unwrap();
    assert!(!ops.is_empty());
    // the new previous document is addressed below the main path
    assert_eq!(
        ops[0].id(),
        &DocId::for_previous(&Path::parse("/content").unwrap(), &rev(100, 1), 0)
    );
    // the main document update comes last
    assert_eq!(ops.last().unwrap().id(), &id);
    store.apply_all(&ops).unwrap();

    let doc = store.find(&id).unwrap().unwrap();
    // a committed anchor for q remains local
    assert_eq!(doc.local_map("q").len(), 1);
    let range = *doc.previous_ranges().values().next().unwrap();
    assert_eq!((range.high, range.low, range.height), (rev(100, 1), rev(1, 1), 0));

    // an old read point still resolves through the previous document
    let read = vector([rev(50, 1)]);
    let state = doc
        .node_at_revision(&ctx, store.as_ref(), &read, None)
        .unwrap()
        .expect("node exists at r50");
    assert_eq!(state.property("q"), Some("\"v50\""));

    // and the current read point resolves from the local map alone
    let state = doc
        .node_at_revision(&ctx, store.as_ref(), &vector([rev(100, 1)]), None)
        .unwrap()
        .unwrap();
    assert_eq!(state.property("q"), Some("\"v100\""));
}

#[test]
fn value_map_is_strictly_descending_after_split() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/content");
    update(&store, &id, |op| {
        op.set_deleted(rev(1, 1), false);
        for i in 1..=100u64 {
            op.set_revision(rev(i, 1), &"c".parse().unwrap())
                .set_map_entry("q", rev(i, 1), &format!("\"v{i}\""));
        }
    });
    let head = vector([rev(200, 1)]);
    let ctx = TestContext::new(store.clone()).with_head(head.clone());
    let doc = store.find(&id).unwrap().unwrap();
    store.apply_all(&doc.split(&ctx, &head).unwrap()).unwrap();

    let doc = store.find(&id).unwrap().unwrap();
    let entries: Vec<_> = doc
        .value_map(store.as_ref(), "q")
        .iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(entries.len(), 100);
    for pair in entries.windows(2) {
        assert!(
            pair[0].0.stable_cmp(&pair[1].0).is_gt(),
            "iteration must be strictly descending"
        );
    }
}

#[test]
fn local_hit_is_rechecked_when_a_previous_range_is_newer() {
    let store = Arc::new(MemoryDocumentStore::new());
    let path = Path::parse("/n").unwrap();
    let id = node_id("/n");

    // previous document holding a change between the two local entries
    let range = Range::new(rev(110, 1), rev(10, 1), 0).unwrap();
    let prev_id = DocId::for_previous(&path, &range.high, 0);
    update(&store, &prev_id, |op| {
        op.set_revision(rev(110, 1), &"c".parse().unwrap())
            .set_map_entry("q", rev(110, 1), "\"mid\"");
    });
    update(&store, &id, |op| {
        op.set_deleted(rev(100, 1), false)
            .set_revision(rev(100, 1), &"c".parse().unwrap())
            .set_revision(rev(150, 1), &"c".parse().unwrap())
            .set_map_entry("q", rev(100, 1), "\"old\"")
            .set_map_entry("q", rev(150, 1), "\"new\"")
            .set_previous(&range);
    });

    let ctx = TestContext::new(store.clone()).with_head(vector([rev(150, 1)]));
    let doc = store.find(&id).unwrap().unwrap();

    // the local map alone would answer "old" at r120; the previous range
    // reaching past r100 forces the complete map, which answers "mid"
    let state = doc
        .node_at_revision(&ctx, store.as_ref(), &vector([rev(120, 1)]), None)
        .unwrap()
        .unwrap();
    assert_eq!(state.property("q"), Some("\"mid\""));

    // at the head everything resolves locally
    let state = doc
        .node_at_revision(&ctx, store.as_ref(), &vector([rev(150, 1)]), None)
        .unwrap()
        .unwrap();
    assert_eq!(state.property("q"), Some("\"new\""));
}

#[test]
fn stale_previous_entries_are_hidden() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/content");
    let range = Range::new(rev(90, 1), rev(10, 1), 0).unwrap();
    update(&store, &id, |op| {
        op.set_deleted(rev(100, 1), false)
            .set_revision(rev(100, 1), &"c".parse().unwrap())
            .set_previous(&range)
            .set_stale_previous(range.high, range.height);
    });

    let doc = store.find(&id).unwrap().unwrap();
    assert!(doc.previous_ranges().is_empty());
    assert_eq!(doc.previous_ranges_including_stale().len(), 1);
}

#[test]
fn split_document_types_survive_the_round_trip() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/content");
    let revs: Vec<_> = (1..=100).map(|i| rev(i, 1)).collect();
    update(&store, &id, |op| {
        op.set_deleted(revs[0], false);
        for r in &revs {
            op.set_revision(*r, &"c".parse().unwrap())
                .set_map_entry("q", *r, "\"v\"");
        }
    });
    let head = vector([rev(200, 1)]);
    let ctx = TestContext::new(store.clone()).with_head(head.clone());
    let doc = store.find(&id).unwrap().unwrap();
    store.apply_all(&doc.split(&ctx, &head).unwrap()).unwrap();

    let prev_id = DocId::for_previous(&Path::parse("/content").unwrap(), &rev(100, 1), 0);
    let prev = store.find(&prev_id).unwrap().unwrap();
    assert!(prev.is_split_document());
    assert_eq!(prev.split_doc_type().unwrap(), SplitDocType::DefaultLeaf);
    assert!(prev.id().is_previous());

    let reparsed = sediment::NodeDocument::from_string(&prev.as_string()).unwrap();
    assert_eq!(reparsed.split_doc_type().unwrap(), SplitDocType::DefaultLeaf);
    assert_eq!(&reparsed, prev.as_ref());
}
