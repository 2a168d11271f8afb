//! Integration tests for the session store against the in-memory database.
//!
//! These tests drive the public store API and assert on the exact calls the
//! database receives.

use std::sync::Arc;
use std::time::Duration;

use cushion_session::codec::{MODIFIED_FIELD, TTL_FIELD};
use cushion_session::{
    BulkOp, ConnectionState, DatabaseError, DbCall, DbOp, Document, ErrorKind, ManualClock,
    MemoryDatabase, Revision, Session, SessionStore, StoreConfig, StoreEvent,
};
use serde_json::{Map, Value, json};

const NOW: i64 = 1_700_000_000_000;

struct Harness {
    db: Arc<MemoryDatabase>,
    clock: Arc<ManualClock>,
    store: SessionStore,
}

fn harness(config: StoreConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(NOW));
    let db = Arc::new(MemoryDatabase::with_clock(clock.clone()));
    let store = SessionStore::builder(db.clone())
        .config(config)
        .clock(clock.clone())
        .build()
        .expect("valid config");
    Harness { db, clock, store }
}

/// Seed a stored session document directly.
fn seed(db: &MemoryDatabase, id: &str, ttl: u64, modified: i64, extra: Value) -> Revision {
    let mut body: Map<String, Value> = extra.as_object().cloned().unwrap_or_default();
    body.insert(TTL_FIELD.to_string(), json!(ttl));
    body.insert(MODIFIED_FIELD.to_string(), json!(modified));
    db.put_raw(Document::new(id, body))
}

/// Yield until `cond` holds, failing after a second.
async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ─────────────────────────────────────────────────────────────────────────────
// get
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_live_session_returns_record_unchanged() {
    let h = harness(StoreConfig::default());
    let rev = seed(&h.db, "sess:key", 4567, NOW, json!({"data": "data"}));

    let record = h.store.get("key").await.unwrap().expect("live session");

    assert_eq!(h.db.calls(), vec![DbCall::Get("sess:key".to_string())]);
    assert_eq!(record.id, "sess:key");
    assert_eq!(record.ttl_seconds, 4567);
    assert_eq!(record.modified_at_millis, NOW);
    assert_eq!(record.revision(), Some(&rev));
    assert_eq!(record.session.get("data"), Some(&json!("data")));
    assert_eq!(record.session.fields.len(), 1);
}

#[tokio::test]
async fn test_get_expired_session_reports_none_and_destroys() {
    let h = harness(StoreConfig::default());
    let rev = seed(&h.db, "sess:key", 1, NOW - 2000, json!({"data": "data"}));

    assert!(h.store.get("key").await.unwrap().is_none());

    let db = h.db.clone();
    wait_until(move || !db.contains("sess:key")).await;
    assert_eq!(
        h.db.calls_of(DbOp::Delete),
        vec![DbCall::Delete {
            id: "sess:key".to_string(),
            rev,
        }]
    );
}

#[tokio::test]
async fn test_lazy_destroy_keeps_session_rewritten_after_expiry() {
    let h = harness(StoreConfig::default());
    seed(&h.db, "sess:key", 1, NOW - 2000, json!({"data": "old"}));

    assert!(h.store.get("key").await.unwrap().is_none());

    // A concurrent writer replaces the session before the background task runs.
    let live_rev = seed(&h.db, "sess:key", 60, NOW, json!({"data": "new"}));

    let db = h.db.clone();
    wait_until(move || db.calls_of(DbOp::Get).len() == 2).await;
    tokio::task::yield_now().await;

    assert!(h.db.calls_of(DbOp::Delete).is_empty());
    assert_eq!(h.db.document("sess:key").unwrap().rev, Some(live_rev));
    let record = h.store.get("key").await.unwrap().expect("live session");
    assert_eq!(record.session.get("data"), Some(&json!("new")));
}

#[tokio::test]
async fn test_get_at_exact_expiry_is_expired() {
    let h = harness(StoreConfig::default());
    seed(&h.db, "sess:key", 10, NOW - 10_000, json!({}));

    assert!(h.store.get("key").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_missing_session_is_none_without_error_event() {
    let h = harness(StoreConfig::default());
    let mut events = h.store.subscribe();

    assert!(h.store.get("nope").await.unwrap().is_none());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_lazy_destroy_failure_surfaces_as_event_only() {
    let h = harness(StoreConfig::default());
    let mut events = h.store.subscribe();
    seed(&h.db, "sess:key", 1, NOW - 2000, json!({}));
    h.db.fail_next(
        DbOp::Delete,
        DatabaseError::Transient {
            status: 503,
            message: "busy".to_string(),
        },
    );

    assert!(h.store.get("key").await.unwrap().is_none());

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event in time")
        .expect("channel open");
    match event {
        StoreEvent::Error(err) => assert_eq!(err.kind(), ErrorKind::Transient),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(h.db.contains("sess:key"));
}

#[tokio::test]
async fn test_get_malformed_document_is_an_error() {
    let h = harness(StoreConfig::default());
    h.db.put_raw(Document::new("sess:key", Map::new()));

    let err = h.store.get("key").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permanent);
}

// ─────────────────────────────────────────────────────────────────────────────
// set
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_new_session_writes_without_revision_hint() {
    let h = harness(StoreConfig::default());
    let mut session = Session::new()
        .with_field("user", json!("ann"))
        .with_cookie_max_age(60_000);

    h.store.set("key", &mut session).await.unwrap();

    assert_eq!(
        h.db.calls(),
        vec![
            DbCall::Head("sess:key".to_string()),
            DbCall::Insert {
                id: "sess:key".to_string(),
                rev: None,
            },
        ]
    );
    assert_eq!(session.revision, None);

    let stored = h.db.document("sess:key").unwrap();
    assert_eq!(stored.body.get(TTL_FIELD), Some(&json!(60)));
    assert_eq!(stored.body.get(MODIFIED_FIELD), Some(&json!(NOW)));
    assert_eq!(stored.body.get("user"), Some(&json!("ann")));
}

#[tokio::test]
async fn test_set_existing_session_attaches_probed_revision() {
    let h = harness(StoreConfig::default());
    let current = seed(&h.db, "sess:key", 60, NOW, json!({}));
    let mut session = Session::new().with_field("user", json!("bob"));
    session.revision = Some(Revision::new("1-stale"));

    h.store.set("key", &mut session).await.unwrap();

    assert_eq!(
        h.db.calls_of(DbOp::Insert),
        vec![DbCall::Insert {
            id: "sess:key".to_string(),
            rev: Some(current.clone()),
        }]
    );
    assert_eq!(session.revision, Some(current));
}

#[tokio::test]
async fn test_set_uses_store_ttl_override() {
    let h = harness(StoreConfig::new().with_ttl(2000));
    let mut session = Session::new().with_cookie_max_age(60_000);

    h.store.set("key", &mut session).await.unwrap();

    let stored = h.db.document("sess:key").unwrap();
    assert_eq!(stored.body.get(TTL_FIELD), Some(&json!(2000)));
}

#[tokio::test]
async fn test_set_probe_failure_aborts_without_write() {
    let h = harness(StoreConfig::default());
    let mut events = h.store.subscribe();
    h.db.fail_next(
        DbOp::Head,
        DatabaseError::Rejected {
            status: 403,
            message: "forbidden".to_string(),
        },
    );

    let err = h.store.set("key", &mut Session::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Permanent);
    assert!(h.db.calls_of(DbOp::Insert).is_empty());
    assert!(!h.db.contains("sess:key"));
    assert!(matches!(events.try_recv().unwrap(), StoreEvent::Error(_)));
}

#[tokio::test]
async fn test_concurrent_writer_between_probe_and_write_conflicts() {
    let h = harness(StoreConfig::default());
    seed(&h.db, "sess:key", 60, NOW, json!({}));
    let mut events = h.store.subscribe();

    // Another writer lands after our probe: the stored revision moves on.
    h.db.fail_next(DbOp::Insert, DatabaseError::Conflict("sess:key".to_string()));

    let err = h.store.set("key", &mut Session::new()).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(err.is_retryable());
    assert!(matches!(events.try_recv().unwrap(), StoreEvent::Error(e) if e.is_conflict()));

    // A retry probes again and wins.
    h.store.set("key", &mut Session::new()).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// destroy
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_destroy_fetches_revision_then_deletes() {
    let h = harness(StoreConfig::default());
    let rev = seed(&h.db, "sess:key", 60, NOW, json!({}));

    h.store.destroy("key").await.unwrap();

    assert_eq!(
        h.db.calls(),
        vec![
            DbCall::Get("sess:key".to_string()),
            DbCall::Delete {
                id: "sess:key".to_string(),
                rev,
            },
        ]
    );
    assert!(h.db.is_empty());
}

#[tokio::test]
async fn test_destroy_delete_not_found_after_fetch_is_error() {
    let h = harness(StoreConfig::default());
    seed(&h.db, "sess:key", 60, NOW, json!({}));
    let mut events = h.store.subscribe();
    h.db.fail_next(DbOp::Delete, DatabaseError::NotFound("sess:key".to_string()));

    let err = h.store.destroy("key").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(events.try_recv().unwrap(), StoreEvent::Error(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// touch
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_touch_with_refresh_disabled_makes_no_calls() {
    let h = harness(StoreConfig::new().with_ttl_refresh(false));
    seed(&h.db, "sess:key", 60, NOW, json!({}));

    h.store.touch("key", &mut Session::new()).await.unwrap();

    assert_eq!(h.db.call_count(), 0);
}

#[tokio::test]
async fn test_touch_rewrites_with_fresh_ttl_and_copies_revision() {
    let h = harness(StoreConfig::default());
    let rev = seed(&h.db, "sess:key", 60, NOW - 30_000, json!({"user": "ann"}));
    h.clock.advance(5_000);

    let mut session = Session::new()
        .with_field("user", json!("ignored"))
        .with_cookie_max_age(120_000);
    h.store.touch("key", &mut session).await.unwrap();

    assert_eq!(
        h.db.calls(),
        vec![
            DbCall::Get("sess:key".to_string()),
            DbCall::Insert {
                id: "sess:key".to_string(),
                rev: Some(rev.clone()),
            },
        ]
    );
    assert_eq!(session.revision, Some(rev));

    let stored = h.db.document("sess:key").unwrap();
    assert_eq!(stored.body.get(TTL_FIELD), Some(&json!(120)));
    assert_eq!(stored.body.get(MODIFIED_FIELD), Some(&json!(NOW + 5_000)));
    assert_eq!(stored.body.get("user"), Some(&json!("ann")));
}

#[tokio::test]
async fn test_touch_missing_session_is_a_no_op() {
    let h = harness(StoreConfig::default());

    h.store.touch("key", &mut Session::new()).await.unwrap();

    assert_eq!(h.db.calls(), vec![DbCall::Get("sess:key".to_string())]);
}

// ─────────────────────────────────────────────────────────────────────────────
// cleanup
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cleanup_with_nothing_expired_skips_bulk_write() {
    let h = harness(StoreConfig::default());
    seed(&h.db, "sess:fresh", 60, NOW, json!({}));

    let report = h.store.cleanup_expired(100).await.unwrap();

    assert_eq!(report.matched, 0);
    assert!(h.db.calls_of(DbOp::BulkWrite).is_empty());
    assert!(h.db.contains("sess:fresh"));
}

#[tokio::test]
async fn test_cleanup_deletes_expired_rows_in_one_bulk_write() {
    let h = harness(StoreConfig::default());
    let a = seed(&h.db, "sess:a", 1, NOW - 5_000, json!({}));
    let b = seed(&h.db, "sess:b", 2, NOW - 5_000, json!({}));
    seed(&h.db, "sess:fresh", 60, NOW, json!({}));

    let report = h.store.cleanup_expired(100).await.unwrap();

    assert_eq!(report.matched, 2);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(
        h.db.calls_of(DbOp::BulkWrite),
        vec![DbCall::BulkWrite(vec![
            BulkOp::delete("sess:a", a),
            BulkOp::delete("sess:b", b),
        ])]
    );
    assert!(!h.db.contains("sess:a"));
    assert!(!h.db.contains("sess:b"));
    assert!(h.db.contains("sess:fresh"));
}

#[tokio::test]
async fn test_cleanup_respects_batch_limit() {
    let h = harness(StoreConfig::new().with_cleanup_batch_size(2));
    for i in 0..5 {
        seed(&h.db, &format!("sess:{i}"), 1, NOW - 5_000, json!({}));
    }

    let report = h.store.cleanup_expired_default().await.unwrap();
    assert_eq!(report.deleted, 2);

    let report = h.store.cleanup_expired_default().await.unwrap();
    assert_eq!(report.deleted, 2);

    let report = h.store.cleanup_expired_default().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(h.db.calls_of(DbOp::BulkWrite).len(), 3);
}

#[tokio::test]
async fn test_cleanup_creates_index_on_first_run() {
    let h = harness(StoreConfig::new().with_index("my_design", "my_view"));

    h.store.cleanup_expired(10).await.unwrap();

    let design = h.db.document("_design/my_design").expect("design document");
    assert!(design.body["views"]["my_view"]["map"].is_string());
}

#[tokio::test]
async fn test_cleanup_adds_view_to_existing_design_document() {
    let h = harness(StoreConfig::default());
    let mut body = Map::new();
    body.insert(
        "views".to_string(),
        json!({ "old_view": { "map": "function (doc) { emit(doc._id, null); }" } }),
    );
    h.db.put_raw(Document::new("_design/expired_sessions", body));
    seed(&h.db, "sess:a", 1, NOW - 5_000, json!({}));

    h.store.ensure_index().await.unwrap();
    let report = h.store.cleanup_expired(10).await.unwrap();

    assert_eq!(report.deleted, 1);
    assert!(!h.db.contains("sess:a"));
    let design = h.db.document("_design/expired_sessions").expect("design document");
    assert!(design.body["views"]["old_view"].is_object());

    // Later runs keep working.
    seed(&h.db, "sess:b", 1, NOW - 5_000, json!({}));
    assert_eq!(h.store.cleanup_expired(10).await.unwrap().deleted, 1);
}

#[tokio::test]
async fn test_cleanup_bulk_failure_fails_the_run() {
    let h = harness(StoreConfig::default());
    seed(&h.db, "sess:a", 1, NOW - 5_000, json!({}));
    let mut events = h.store.subscribe();
    h.db.fail_next(DbOp::BulkWrite, DatabaseError::Unavailable("reset".to_string()));

    let err = h.store.cleanup_expired(10).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(matches!(events.try_recv().unwrap(), StoreEvent::Error(_)));
    assert!(h.db.contains("sess:a"));
    assert_eq!(h.db.calls_of(DbOp::BulkWrite).len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connection_events() {
    let h = harness(StoreConfig::default());
    let mut events = h.store.subscribe();

    assert_eq!(h.store.check_connection().await, ConnectionState::Connected);
    h.db.fail_next(DbOp::Info, DatabaseError::Unavailable("refused".to_string()));
    assert_eq!(h.store.check_connection().await, ConnectionState::Disconnected);

    assert!(matches!(events.recv().await.unwrap(), StoreEvent::Connect));
    assert!(matches!(events.recv().await.unwrap(), StoreEvent::Disconnect));
}

#[tokio::test]
async fn test_full_lifecycle() {
    let h = harness(StoreConfig::default());
    let mut session = Session::new().with_cookie_max_age(10_000);

    h.store.set("key", &mut session).await.unwrap();
    assert!(h.store.get("key").await.unwrap().is_some());

    h.clock.advance(5_000);
    h.store.touch("key", &mut session).await.unwrap();

    h.clock.advance(9_000);
    assert!(h.store.get("key").await.unwrap().is_some());

    h.clock.advance(1_000);
    assert!(h.store.get("key").await.unwrap().is_none());

    let db = h.db.clone();
    wait_until(move || !db.contains("sess:key")).await;
}
