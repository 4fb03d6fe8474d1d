use std::collections::HashSet;

use super::*;
use crate::channel::memory::MemoryChannel;

const CANVAS: &str = "canvas-1";

fn test_store() -> (ObjectStore, MemoryChannel) {
    let channel = MemoryChannel::new();
    (ObjectStore::new(Arc::new(channel.clone())), channel)
}

// =============================================================================
// id generation
// =============================================================================

#[test]
fn shape_id_embeds_creator_and_time() {
    let id = shape_id("user-a", 1_700_000_000_123);
    assert!(id.starts_with("user-a_1700000000123_"));
    let suffix = id.rsplit('_').next().unwrap();
    assert_eq!(suffix.len(), ID_SUFFIX_LEN);
    assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn shape_ids_in_same_millisecond_are_distinct() {
    // Two users (or the same user twice) within one millisecond must not
    // collide thanks to the random suffix.
    let mut seen = HashSet::new();
    for _ in 0..100 {
        assert!(seen.insert(shape_id("user-a", 42)));
    }
    assert_ne!(shape_id("user-a", 42), shape_id("user-b", 42));
}

// =============================================================================
// create
// =============================================================================

#[tokio::test]
async fn create_shape_writes_full_record() {
    let (store, channel) = test_store();
    let draft = ShapeDraft::new(ShapeKind::Rectangle, 10.0, 20.0, "#FF0000")
        .with_size(80.0, 40.0)
        .with_z_index(3);
    let id = store
        .create_shape_at(CANVAS, draft, "user-a", 1_700_000_000_000)
        .await
        .unwrap();

    let snapshot = channel.read_all(CANVAS, Collection::Objects).await.unwrap();
    let record = &snapshot[&id];
    assert_eq!(record["type"], "rectangle");
    assert_eq!(record["createdBy"], "user-a");
    assert_eq!(record["timestamp"], 1_700_000_000_000_i64);
    assert_eq!(record["zIndex"], 3);
    assert_eq!(record["width"], 80.0);
    // Created unlocked, fields present as null.
    assert!(record["lockedBy"].is_null());
    assert!(record["lockedByUserName"].is_null());
}

#[tokio::test]
async fn create_shape_rejected_on_write_failure() {
    let (store, channel) = test_store();
    channel.set_fail_writes(true);
    let draft = ShapeDraft::new(ShapeKind::Text, 0.0, 0.0, "#000000").with_text("hi");
    let err = store.create_shape(CANVAS, draft, "user-a").await.unwrap_err();
    assert!(matches!(err, ChannelError::Write(_)));
}

// =============================================================================
// update
// =============================================================================

#[tokio::test]
async fn update_shape_merges_partial_fields() {
    let (store, channel) = test_store();
    let draft = ShapeDraft::new(ShapeKind::Circle, 5.0, 6.0, "#00FF00").with_radius(30.0);
    let id = store.create_shape(CANVAS, draft, "user-a").await.unwrap();

    let mut fields = Fields::new();
    fields.insert("x".into(), serde_json::json!(50.0));
    fields.insert("y".into(), serde_json::json!(60.0));
    store.update_shape(CANVAS, &id, fields).await.unwrap();

    let shapes = store.read_shapes(CANVAS).await.unwrap();
    let shape = &shapes[&id];
    assert!((shape.x - 50.0).abs() < f64::EPSILON);
    assert!((shape.y - 60.0).abs() < f64::EPSILON);
    // Untouched fields survive the merge.
    assert_eq!(shape.radius, Some(30.0));
    assert_eq!(shape.color, "#00FF00");

    drop(channel);
}

// =============================================================================
// delete
// =============================================================================

#[tokio::test]
async fn delete_shape_removes_record() {
    let (store, _channel) = test_store();
    let id = store
        .create_shape(CANVAS, ShapeDraft::new(ShapeKind::Rectangle, 0.0, 0.0, "#FFF"), "user-a")
        .await
        .unwrap();
    store.delete_shape(CANVAS, &id).await.unwrap();
    assert!(store.read_shapes(CANVAS).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_shapes_removes_all_listed() {
    let (store, _channel) = test_store();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = store
            .create_shape(CANVAS, ShapeDraft::new(ShapeKind::Rectangle, 0.0, 0.0, "#FFF"), "user-a")
            .await
            .unwrap();
        ids.push(id);
    }
    store.delete_shapes(CANVAS, &ids[..2]).await.unwrap();

    let shapes = store.read_shapes(CANVAS).await.unwrap();
    assert_eq!(shapes.len(), 1);
    assert!(shapes.contains_key(&ids[2]));
}

// =============================================================================
// lock / unlock
// =============================================================================

#[tokio::test]
async fn lock_then_unlock_round_trips_fields() {
    let (store, _channel) = test_store();
    let id = store
        .create_shape(CANVAS, ShapeDraft::new(ShapeKind::Rectangle, 0.0, 0.0, "#FFF"), "user-a")
        .await
        .unwrap();

    store.lock_shape(CANVAS, &id, "user-a", "Ada").await.unwrap();
    let shapes = store.read_shapes(CANVAS).await.unwrap();
    assert_eq!(shapes[&id].locked_by.as_deref(), Some("user-a"));
    assert_eq!(shapes[&id].locked_by_user_name.as_deref(), Some("Ada"));

    store.unlock_shape(CANVAS, &id).await.unwrap();
    let shapes = store.read_shapes(CANVAS).await.unwrap();
    assert!(shapes[&id].locked_by.is_none());
    assert!(shapes[&id].locked_by_user_name.is_none());
}

#[tokio::test]
async fn unlock_shapes_releases_batch() {
    let (store, _channel) = test_store();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = store
            .create_shape(CANVAS, ShapeDraft::new(ShapeKind::Rectangle, 0.0, 0.0, "#FFF"), "user-a")
            .await
            .unwrap();
        store.lock_shape(CANVAS, &id, "user-a", "Ada").await.unwrap();
        ids.push(id);
    }

    store.unlock_shapes(CANVAS, &ids).await.unwrap();

    let shapes = store.read_shapes(CANVAS).await.unwrap();
    assert!(shapes.values().all(|s| s.locked_by.is_none()));
}

#[tokio::test]
async fn unlock_shapes_empty_batch_issues_no_call() {
    let (store, channel) = test_store();
    channel.set_fail_writes(true);
    // Empty batch short-circuits before touching the channel.
    store.unlock_shapes(CANVAS, &[]).await.unwrap();
}

// =============================================================================
// decode / subscribe
// =============================================================================

#[tokio::test]
async fn decode_shapes_skips_undecodable_entries() {
    let mut snapshot = Snapshot::new();
    snapshot.insert(
        "good".into(),
        serde_json::json!({
            "id": "good", "type": "rectangle", "x": 1.0, "y": 2.0,
            "color": "#FFF", "rotation": 0.0, "createdBy": "user-a",
            "timestamp": 1, "zIndex": 0, "lockedBy": null, "lockedByUserName": null
        }),
    );
    snapshot.insert("bad".into(), serde_json::json!({"type": "not-a-kind"}));

    let shapes = decode_shapes(&snapshot);
    assert_eq!(shapes.len(), 1);
    assert!(shapes.contains_key("good"));
}

#[tokio::test]
async fn subscribe_shapes_delivers_decoded_snapshots() {
    let (store, _channel) = test_store();
    let mut sub = store.subscribe_shapes(CANVAS).await.unwrap();
    // Priming snapshot of the empty collection.
    assert!(sub.recv().await.unwrap().is_empty());

    let id = store
        .create_shape(CANVAS, ShapeDraft::new(ShapeKind::Rectangle, 7.0, 8.0, "#FFF"), "user-a")
        .await
        .unwrap();

    let shapes = sub.recv().await.unwrap();
    assert_eq!(shapes.len(), 1);
    assert!((shapes[&id].x - 7.0).abs() < f64::EPSILON);
}
