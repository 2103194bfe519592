//! End-to-end scenarios for the bulk write engine and change feed.

use serde_json::json;
use siderite::{
    ChangeDirection, ChangeOperation, ChangedDocumentsRequest, CollectionSchema, DocumentData,
    InstanceSettings, StorageInstance, WriteRow,
};

fn doc(value: serde_json::Value) -> DocumentData {
    value.as_object().unwrap().clone()
}

fn open_store() -> StorageInstance {
    StorageInstance::open_in_memory(InstanceSettings::new(
        "app",
        "docs",
        CollectionSchema::with_primary_key(1, "id"),
    ))
}

fn rev_of(d: &DocumentData) -> &str {
    d.get("_rev").and_then(|v| v.as_str()).unwrap()
}

#[tokio::test]
async fn insert_update_delete_resurrect_lifecycle() {
    let store = open_store();
    let mut feed = store.change_stream().unwrap();

    // Insert, then re-issuing the same row without a previous conflicts.
    let inserted = store
        .bulk_write(vec![WriteRow::insert(doc(json!({ "id": "a", "v": 1 })))])
        .await
        .unwrap();
    assert!(inserted.error.is_empty());
    let stored_v1 = inserted.success["a"].clone();
    assert!(rev_of(&stored_v1).starts_with("1-"));

    let conflicted = store
        .bulk_write(vec![WriteRow::insert(doc(json!({ "id": "a", "v": 1 })))])
        .await
        .unwrap();
    assert!(conflicted.success.is_empty());
    assert_eq!(conflicted.error["a"].status, 409);

    let insert_bulk = feed.recv().await.unwrap();
    assert_eq!(insert_bulk.events.len(), 1);
    assert_eq!(insert_bulk.events[0].operation, ChangeOperation::Insert);
    assert!(insert_bulk.events[0].end_time >= insert_bulk.events[0].start_time);

    // Update succeeds when the previous revision matches.
    let updated = store
        .bulk_write(vec![WriteRow::update(
            doc(json!({ "id": "a", "v": 2 })),
            stored_v1.clone(),
        )])
        .await
        .unwrap();
    assert!(updated.error.is_empty());
    let stored_v2 = updated.success["a"].clone();
    assert!(rev_of(&stored_v2).starts_with("2-"));

    let update_bulk = feed.recv().await.unwrap();
    let update_event = &update_bulk.events[0];
    assert_eq!(update_event.operation, ChangeOperation::Update);
    assert_eq!(
        update_event.previous.as_ref().unwrap().get("v"),
        Some(&json!(1))
    );
    assert_eq!(
        update_event.document.as_ref().unwrap().get("v"),
        Some(&json!(2))
    );

    // Delete moves the document to the deleted table and rewrites the
    // event's previous revision to the tombstone revision.
    let deleted = store
        .bulk_write(vec![WriteRow::update(
            doc(json!({ "id": "a", "v": 2, "_deleted": true })),
            stored_v2.clone(),
        )])
        .await
        .unwrap();
    let tombstone = deleted.success["a"].clone();
    assert!(rev_of(&tombstone).starts_with("3-"));

    let delete_bulk = feed.recv().await.unwrap();
    let delete_event = &delete_bulk.events[0];
    assert_eq!(delete_event.operation, ChangeOperation::Delete);
    assert!(delete_event.document.is_none());
    assert_eq!(
        rev_of(delete_event.previous.as_ref().unwrap()),
        rev_of(&tombstone)
    );

    let ids = vec!["a".to_string()];
    assert!(store
        .find_documents_by_id(&ids, false)
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .find_documents_by_id(&ids, true)
        .await
        .unwrap()
        .contains_key("a"));

    // Resurrect: a write without previous lands on the tombstone.
    let resurrected = store
        .bulk_write(vec![WriteRow::insert(doc(json!({ "id": "a", "v": 3 })))])
        .await
        .unwrap();
    assert!(resurrected.error.is_empty());
    assert!(rev_of(&resurrected.success["a"]).starts_with("4-"));

    let resurrect_bulk = feed.recv().await.unwrap();
    let resurrect_event = &resurrect_bulk.events[0];
    assert_eq!(resurrect_event.operation, ChangeOperation::Insert);
    assert!(resurrect_event.previous.is_none());

    let live_again = store.find_documents_by_id(&ids, false).await.unwrap();
    assert_eq!(live_again["a"].get("v"), Some(&json!(3)));
    // Partition: the id must no longer exist as a tombstone. Looking it up
    // with tombstones included must return the live document.
    let everything = store.find_documents_by_id(&ids, true).await.unwrap();
    assert_eq!(everything["a"].get("_deleted"), Some(&json!(false)));

    // Bulk ids are distinct dedup tokens.
    let bulk_ids: std::collections::HashSet<String> = [
        insert_bulk.id,
        update_bulk.id,
        delete_bulk.id,
        resurrect_bulk.id,
    ]
    .into_iter()
    .collect();
    assert_eq!(bulk_ids.len(), 4);

    // Changed-documents continuation over the four commits above.
    let first_page = store
        .get_changed_documents(&ChangedDocumentsRequest {
            since_sequence: 0,
            direction: ChangeDirection::After,
            limit: Some(2),
        })
        .await
        .unwrap();
    let sequences: Vec<u64> = first_page
        .changed_documents
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(first_page.last_sequence, 2);

    let second_page = store
        .get_changed_documents(&ChangedDocumentsRequest {
            since_sequence: first_page.last_sequence,
            direction: ChangeDirection::After,
            limit: None,
        })
        .await
        .unwrap();
    let sequences: Vec<u64> = second_page
        .changed_documents
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, vec![3, 4]);
    assert_eq!(second_page.last_sequence, 4);
    assert!(second_page
        .changed_documents
        .iter()
        .all(|e| e.document_id == "a"));
}

#[tokio::test]
async fn losing_revisions_are_dropped_silently() {
    let store = open_store();
    let mut feed = store.change_stream().unwrap();

    store
        .bulk_add_revisions(vec![doc(json!({ "id": "a", "v": 3, "_rev": "3-h" }))])
        .await
        .unwrap();
    let seeded = feed.recv().await.unwrap();
    assert_eq!(seeded.events[0].operation, ChangeOperation::Insert);

    // A lower revision must neither change state nor publish anything.
    store
        .bulk_add_revisions(vec![doc(json!({ "id": "a", "v": 0, "_rev": "2-z" }))])
        .await
        .unwrap();

    // A higher revision is applied and published.
    store
        .bulk_add_revisions(vec![doc(json!({ "id": "a", "v": 4, "_rev": "4-y" }))])
        .await
        .unwrap();

    let bulk = feed.recv().await.unwrap();
    assert_eq!(bulk.events.len(), 1);
    assert_eq!(bulk.events[0].operation, ChangeOperation::Update);

    let found = store
        .find_documents_by_id(&["a".to_string()], false)
        .await
        .unwrap();
    assert_eq!(rev_of(&found["a"]), "4-y");
    assert_eq!(found["a"].get("v"), Some(&json!(4)));

    // Only the two applied revisions left changes rows.
    let changes = store
        .get_changed_documents(&ChangedDocumentsRequest {
            since_sequence: 0,
            direction: ChangeDirection::After,
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(changes.changed_documents.len(), 2);
}

#[tokio::test]
async fn changed_documents_before_direction() {
    let store = open_store();
    for i in 0..5 {
        store
            .bulk_write(vec![WriteRow::insert(doc(
                json!({ "id": format!("d{i}") }),
            ))])
            .await
            .unwrap();
    }

    let page = store
        .get_changed_documents(&ChangedDocumentsRequest {
            since_sequence: 4,
            direction: ChangeDirection::Before,
            limit: Some(2),
        })
        .await
        .unwrap();
    let sequences: Vec<u64> = page.changed_documents.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![3, 2]);
    assert_eq!(page.last_sequence, 2);

    let empty = store
        .get_changed_documents(&ChangedDocumentsRequest {
            since_sequence: 1,
            direction: ChangeDirection::Before,
            limit: None,
        })
        .await
        .unwrap();
    assert!(empty.changed_documents.is_empty());
    assert_eq!(empty.last_sequence, 1);
}

#[tokio::test]
async fn tombstone_inserts_append_changes_but_publish_nothing() {
    let store = open_store();
    let mut feed = store.change_stream().unwrap();

    let result = store
        .bulk_write(vec![WriteRow::insert(doc(
            json!({ "id": "gone", "_deleted": true }),
        ))])
        .await
        .unwrap();
    assert!(result.success.contains_key("gone"));

    // The accepted tombstone left a changes row but no event bulk.
    let changes = store
        .get_changed_documents(&ChangedDocumentsRequest {
            since_sequence: 0,
            direction: ChangeDirection::After,
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(changes.changed_documents.len(), 1);

    store.close();
    assert!(matches!(
        feed.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Closed)
    ));
}

#[tokio::test]
async fn remote_tombstone_update_leaves_no_trace() {
    let store = open_store();

    store
        .bulk_add_revisions(vec![doc(
            json!({ "id": "a", "_rev": "2-a", "_deleted": true }),
        )])
        .await
        .unwrap();
    let after_insert = store
        .get_changed_documents(&ChangedDocumentsRequest {
            since_sequence: 0,
            direction: ChangeDirection::After,
            limit: None,
        })
        .await
        .unwrap();
    let baseline = after_insert.changed_documents.len();

    // Newer tombstone payload over an existing tombstone: revision moves,
    // the changes log does not.
    store
        .bulk_add_revisions(vec![doc(
            json!({ "id": "a", "_rev": "3-b", "_deleted": true }),
        )])
        .await
        .unwrap();

    let after_update = store
        .get_changed_documents(&ChangedDocumentsRequest {
            since_sequence: 0,
            direction: ChangeDirection::After,
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(after_update.changed_documents.len(), baseline);

    let found = store
        .find_documents_by_id(&["a".to_string()], true)
        .await
        .unwrap();
    assert_eq!(rev_of(&found["a"]), "3-b");
}

#[tokio::test]
async fn events_follow_row_input_order() {
    let store = open_store();
    let mut feed = store.change_stream().unwrap();

    store
        .bulk_write(vec![
            WriteRow::insert(doc(json!({ "id": "z", "v": 1 }))),
            WriteRow::insert(doc(json!({ "id": "a", "v": 1 }))),
            WriteRow::insert(doc(json!({ "id": "m", "v": 1 }))),
        ])
        .await
        .unwrap();

    let bulk = feed.recv().await.unwrap();
    let order: Vec<&str> = bulk.events.iter().map(|e| e.document_id.as_str()).collect();
    assert_eq!(order, vec!["z", "a", "m"]);
}
