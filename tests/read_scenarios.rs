//! Read-side scenarios: trunk reads, branch isolation, and collision
//! collection during a commit attempt.

mod fixtures;

use std::collections::HashSet;
use std::sync::Arc;

use fixtures::{node_id, rev, update, vector, TestContext};
use sediment::{Branch, Branches, DocumentStore, MemoryDocumentStore, Revision};

#[test]
fn trunk_read_sees_committed_value() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/a");
    let r1 = rev(1, 1);
    update(&store, &id, |op| {
        op.set_revision(r1, &"c".parse().unwrap())
            .set_deleted(r1, false)
            .set_map_entry("p", r1, "\"hello\"");
    });

    let ctx = TestContext::new(store.clone()).with_head(vector([r1]));
    let doc = store.find(&id).unwrap().unwrap();
    let state = doc
        .node_at_revision(&ctx, store.as_ref(), &vector([r1]), None)
        .unwrap()
        .expect("node must exist at r1");
    assert_eq!(state.property("p"), Some("\"hello\""));
    assert_eq!(state.last_revision().revision(1), Some(&r1));
}

#[test]
fn unmerged_branch_commit_is_invisible_from_trunk() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/a");
    let r0 = rev(1, 1);
    let r1 = rev(2, 1);
    update(&store, &id, |op| {
        op.set_map_entry("_revisions", r1, &format!("b{}", r0))
            .set_deleted(r1, false)
            .set_map_entry("p", r1, "\"x\"");
    });

    let ctx = TestContext::new(store.clone()).with_head(vector([r0]));
    let doc = store.find(&id).unwrap().unwrap();
    let state = doc
        .node_at_revision(&ctx, store.as_ref(), &vector([r0]), None)
        .unwrap();
    assert!(state.is_none(), "trunk must not see the unmerged branch");
}

#[test]
fn branch_read_sees_its_own_branch_commit() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/a");
    let r0 = rev(1, 1);
    let r1 = rev(2, 1);
    update(&store, &id, |op| {
        op.set_map_entry("_revisions", r1, &format!("b{}", r0))
            .set_deleted(r1, false)
            .set_map_entry("p", r1, "\"x\"");
    });

    let mut branches = Branches::new();
    branches.add(Branch::new(vector([r0]), [r1]));
    let ctx = TestContext::new(store.clone())
        .with_head(vector([r0]))
        .with_branches(branches);

    let read = vector([r0]).update(r1.as_branch());
    let doc = store.find(&id).unwrap().unwrap();
    let state = doc
        .node_at_revision(&ctx, store.as_ref(), &read, None)
        .unwrap()
        .expect("branch read must see its own commit");
    assert_eq!(state.property("p"), Some("\"x\""));
}

#[test]
fn foreign_branch_read_does_not_see_the_commit() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/a");
    let r0 = rev(1, 1);
    let r1 = rev(2, 1);
    let other = rev(3, 1);
    update(&store, &id, |op| {
        op.set_map_entry("_revisions", r1, &format!("b{}", r0))
            .set_deleted(r1, false)
            .set_map_entry("p", r1, "\"x\"");
    });

    let mut branches = Branches::new();
    branches.add(Branch::new(vector([r0]), [r1]));
    branches.add(Branch::new(vector([r0]), [other]));
    let ctx = TestContext::new(store.clone())
        .with_head(vector([r0]))
        .with_branches(branches);

    let read = vector([r0]).update(other.as_branch());
    let doc = store.find(&id).unwrap().unwrap();
    let state = doc
        .node_at_revision(&ctx, store.as_ref(), &read, None)
        .unwrap();
    assert!(state.is_none());
}

#[test]
fn newest_revision_collects_concurrent_uncommitted_change() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/a");
    let r1 = rev(1, 1);
    let r2 = rev(2, 1);
    update(&store, &id, |op| {
        op.set_revision(r1, &"c".parse().unwrap())
            .set_map_entry("_revisions", r2, &format!("b{}", r1))
            .set_deleted(r1, false);
    });

    let ctx = TestContext::new(store.clone()).with_head(vector([r2]));
    let doc = store.find(&id).unwrap().unwrap();
    let mut collisions = HashSet::new();
    let newest = doc
        .newest_revision(
            &ctx,
            store.as_ref(),
            &vector([r1]),
            rev(3, 1),
            None,
            &mut collisions,
        )
        .unwrap();
    assert_eq!(newest, Some(r1));
    assert_eq!(collisions, HashSet::from([r2]));
}

#[test]
fn latest_value_is_deterministic_for_a_read_point() {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = node_id("/a");
    let revs: Vec<Revision> = (1..=5).map(|i| rev(i, 1)).collect();
    update(&store, &id, |op| {
        op.set_deleted(revs[0], false);
        for (i, r) in revs.iter().enumerate() {
            op.set_revision(*r, &"c".parse().unwrap())
                .set_map_entry("p", *r, &format!("\"v{i}\""));
        }
    });

    let ctx = TestContext::new(store.clone()).with_head(vector([revs[4]]));
    let doc = store.find(&id).unwrap().unwrap();
    for (i, r) in revs.iter().enumerate() {
        let read = vector([*r]);
        for _ in 0..2 {
            let state = doc
                .node_at_revision(&ctx, store.as_ref(), &read, None)
                .unwrap()
                .unwrap();
            assert_eq!(state.property("p"), Some(format!("\"v{i}\"").as_str()));
        }
    }
}
