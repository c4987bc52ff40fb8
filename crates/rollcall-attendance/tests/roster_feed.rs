//! Integration tests for the live roster feed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::StreamExt;
use rollcall_attendance::{FeedConfig, FeedError, RosterFeed};
use rollcall_protocol::{
    AttendanceRecord, CourseId, InstructorId, RecordId, RosterDelta, Session,
    SessionId, SessionStatus, SigningKey, StudentId, TokenCodec,
};
use rollcall_store::{InsertOutcome, MemoryStore, SessionStore};

const COURSE: CourseId = CourseId(7);

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_760_601_600_000).unwrap()
}

/// A store with one active session and `enrolled` students (ids 1..).
async fn setup(enrolled: u64) -> (MemoryStore, SessionId) {
    let store = MemoryStore::new();
    store.enroll_all(COURSE, (1..=enrolled).map(StudentId)).await;

    let codec = TokenCodec::new(&SigningKey::generate()).unwrap();
    let id = SessionId::new();
    store
        .create_session(Session {
            id,
            course_id: COURSE,
            owner_id: InstructorId(1),
            session_date: t0().date_naive(),
            started_at: t0(),
            ended_at: None,
            current_token: codec.issue(id, t0()),
            previous_token: None,
            rotations: 0,
            late_threshold_minutes: 10,
            status: SessionStatus::Active,
        })
        .await
        .unwrap();
    (store, id)
}

fn feed(store: &MemoryStore, config: FeedConfig) -> RosterFeed<MemoryStore> {
    RosterFeed::new(Arc::new(store.clone()), config)
}

/// Commits a record straight to the store, `minute` minutes after start.
async fn commit(
    store: &MemoryStore,
    session_id: SessionId,
    student: u64,
    minute: i64,
) -> AttendanceRecord {
    let record = AttendanceRecord {
        id: RecordId::new(),
        session_id,
        student_id: StudentId(student),
        marked_at: t0() + TimeDelta::minutes(minute),
        is_late: minute > 10,
        is_manual: false,
        seq: 0,
    };
    match store.insert_attendance_if_absent(record).await.unwrap() {
        InsertOutcome::Created(record) => record,
        other => panic!("expected Created, got {other:?}"),
    }
}

fn marked_seq(delta: Option<RosterDelta>) -> u64 {
    match delta {
        Some(RosterDelta::Marked { record, .. }) => record.seq,
        other => panic!("expected Marked, got {other:?}"),
    }
}

// =========================================================================
// Subscribe
// =========================================================================

#[tokio::test]
async fn test_subscribe_first_delta_is_snapshot_of_store() {
    let (store, id) = setup(30).await;
    commit(&store, id, 1, 1).await;
    commit(&store, id, 2, 12).await;
    let feed = feed(&store, FeedConfig::default());

    let mut sub = feed.subscribe(id).await.unwrap();

    assert_eq!(sub.session_id(), id);
    match sub.recv().await {
        Some(RosterDelta::Snapshot(snapshot)) => {
            assert_eq!(snapshot.status, SessionStatus::Active);
            assert_eq!(snapshot.counts.enrolled, 30);
            assert_eq!(snapshot.counts.present, 2);
            assert_eq!(snapshot.counts.late, 1);
            // Newest first.
            assert_eq!(snapshot.recent[0].student_id, StudentId(2));
        }
        other => panic!("expected Snapshot, got {other:?}"),
    }
    assert_eq!(feed.watched_sessions().await, 1);
}

#[tokio::test]
async fn test_subscribe_unknown_session_is_not_found() {
    let (store, _) = setup(1).await;
    let feed = feed(&store, FeedConfig::default());

    let err = feed.subscribe(SessionId::new()).await.err().unwrap();

    assert!(matches!(err, FeedError::SessionNotFound(_)));
    assert_eq!(feed.watched_sessions().await, 0);
}

#[tokio::test]
async fn test_subscribe_ended_session_gets_snapshot_then_closed() {
    let (store, id) = setup(5).await;
    commit(&store, id, 1, 1).await;
    let ended_at = t0() + TimeDelta::minutes(50);
    store.end_session(id, ended_at).await.unwrap();
    let feed = feed(&store, FeedConfig::default());

    let sub = feed.subscribe(id).await.unwrap();
    let deltas: Vec<RosterDelta> = sub.into_stream().collect().await;

    assert_eq!(deltas.len(), 2);
    assert!(matches!(&deltas[0], RosterDelta::Snapshot(s) if s.status == SessionStatus::Ended));
    match &deltas[1] {
        RosterDelta::Closed { ended_at: at, counts, .. } => {
            assert_eq!(*at, Some(ended_at));
            assert_eq!(counts.present, 1);
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert_eq!(feed.watched_sessions().await, 0);
}

#[tokio::test]
async fn test_subscribe_store_down_is_transient() {
    let (store, id) = setup(1).await;
    let feed = feed(&store, FeedConfig::default());
    store.set_offline(true);

    let err = feed.subscribe(id).await.err().unwrap();

    assert!(err.is_transient());
}

// =========================================================================
// Publish
// =========================================================================

#[tokio::test]
async fn test_publish_delivers_marked_in_commit_order_with_counts() {
    let (store, id) = setup(4).await;
    let feed = feed(&store, FeedConfig::default());
    let mut sub = feed.subscribe(id).await.unwrap();
    assert!(matches!(sub.recv().await, Some(RosterDelta::Snapshot(_))));

    for (student, minute) in [(1, 2), (2, 11), (3, 15)] {
        let record = commit(&store, id, student, minute).await;
        feed.publish(record).await;
    }

    match sub.recv().await {
        Some(RosterDelta::Marked { record, counts }) => {
            assert_eq!(record.student_id, StudentId(1));
            assert_eq!((counts.present, counts.late, counts.enrolled), (1, 0, 4));
        }
        other => panic!("expected Marked, got {other:?}"),
    }
    assert_eq!(marked_seq(sub.recv().await), 2);
    match sub.recv().await {
        Some(RosterDelta::Marked { counts, .. }) => {
            assert_eq!((counts.present, counts.late), (3, 2));
            assert_eq!(counts.on_time(), 1);
        }
        other => panic!("expected Marked, got {other:?}"),
    }
}

#[tokio::test]
async fn test_publish_out_of_order_is_reordered() {
    let (store, id) = setup(3).await;
    let feed = feed(&store, FeedConfig::default());
    let mut sub = feed.subscribe(id).await.unwrap();
    sub.recv().await;

    let first = commit(&store, id, 1, 1).await;
    let second = commit(&store, id, 2, 1).await;
    feed.publish(second).await;
    feed.publish(first).await;

    assert_eq!(marked_seq(sub.recv().await), 1);
    assert_eq!(marked_seq(sub.recv().await), 2);
}

#[tokio::test(start_paused = true)]
async fn test_publish_duplicate_is_delivered_once() {
    let (store, id) = setup(2).await;
    let feed = feed(&store, FeedConfig::default());
    let mut sub = feed.subscribe(id).await.unwrap();
    sub.recv().await;

    let record = commit(&store, id, 1, 1).await;
    feed.publish(record.clone()).await;
    feed.publish(record).await;

    assert_eq!(marked_seq(sub.recv().await), 1);
    let next = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await;
    assert!(next.is_err(), "duplicate delivered: {next:?}");
}

#[tokio::test]
async fn test_publish_without_subscribers_is_noop() {
    let (store, id) = setup(2).await;
    let feed = feed(&store, FeedConfig::default());

    let record = commit(&store, id, 1, 1).await;
    feed.publish(record).await;

    assert_eq!(feed.watched_sessions().await, 0);
    // A later subscriber still sees the record through the store.
    let snapshot = feed.snapshot(id).await.unwrap();
    assert_eq!(snapshot.counts.present, 1);
}

#[tokio::test]
async fn test_commit_before_subscribe_is_not_repeated() {
    let (store, id) = setup(2).await;
    let feed = feed(&store, FeedConfig::default());
    let _warm = feed.subscribe(id).await.unwrap();

    let record = commit(&store, id, 1, 1).await;
    feed.publish(record).await;
    // The actor has folded the commit once this answers.
    assert_eq!(feed.snapshot(id).await.unwrap().counts.present, 1);

    let mut late_joiner = feed.subscribe(id).await.unwrap();
    match late_joiner.recv().await {
        Some(RosterDelta::Snapshot(s)) => assert_eq!(s.counts.present, 1),
        other => panic!("expected Snapshot, got {other:?}"),
    }
    let second = commit(&store, id, 2, 2).await;
    feed.publish(second).await;
    assert_eq!(marked_seq(late_joiner.recv().await), 2);
}

// =========================================================================
// Lag and close
// =========================================================================

#[tokio::test]
async fn test_lagged_subscriber_receives_fresh_snapshot() {
    let (store, id) = setup(10).await;
    let config = FeedConfig {
        channel_capacity: 2,
        ..FeedConfig::default()
    };
    let feed = feed(&store, config);
    let mut sub = feed.subscribe(id).await.unwrap();
    assert!(matches!(sub.recv().await, Some(RosterDelta::Snapshot(_))));

    for student in 1..=5 {
        let record = commit(&store, id, student, 1).await;
        feed.publish(record).await;
    }
    assert_eq!(feed.snapshot(id).await.unwrap().counts.present, 5);

    match sub.recv().await {
        Some(RosterDelta::Snapshot(s)) => assert_eq!(s.counts.present, 5),
        other => panic!("expected resync Snapshot, got {other:?}"),
    }

    // Deltas already covered by the snapshot are skipped.
    let record = commit(&store, id, 6, 1).await;
    feed.publish(record).await;
    assert_eq!(marked_seq(sub.recv().await), 6);
}

#[tokio::test]
async fn test_close_sends_closed_then_ends_stream() {
    let (store, id) = setup(3).await;
    let feed = feed(&store, FeedConfig::default());
    let sub = feed.subscribe(id).await.unwrap();

    let record = commit(&store, id, 1, 1).await;
    feed.publish(record).await;
    let ended_at = t0() + TimeDelta::minutes(45);
    store.end_session(id, ended_at).await.unwrap();
    feed.close(id, Some(ended_at)).await;

    let deltas: Vec<RosterDelta> = sub.into_stream().collect().await;

    assert_eq!(deltas.len(), 3);
    assert!(matches!(deltas[0], RosterDelta::Snapshot(_)));
    assert!(matches!(deltas[1], RosterDelta::Marked { .. }));
    match &deltas[2] {
        RosterDelta::Closed { ended_at: at, counts, .. } => {
            assert_eq!(*at, Some(ended_at));
            assert_eq!(counts.present, 1);
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert_eq!(feed.watched_sessions().await, 0);
}

#[tokio::test]
async fn test_close_emits_unpublished_commits_before_closed() {
    let (store, id) = setup(3).await;
    let feed = feed(&store, FeedConfig::default());
    let sub = feed.subscribe(id).await.unwrap();

    // Committed, but its publish never reaches the feed before close.
    let record = commit(&store, id, 2, 3).await;
    let ended_at = t0() + TimeDelta::minutes(45);
    store.end_session(id, ended_at).await.unwrap();
    feed.close(id, Some(ended_at)).await;

    let deltas: Vec<RosterDelta> = sub.into_stream().collect().await;

    assert_eq!(deltas.len(), 3, "got {deltas:?}");
    match &deltas[0] {
        RosterDelta::Snapshot(s) => assert_eq!(s.counts.present, 0),
        other => panic!("expected Snapshot, got {other:?}"),
    }
    match &deltas[1] {
        RosterDelta::Marked { record: marked, counts } => {
            assert_eq!(marked.id, record.id);
            assert_eq!(counts.present, 1);
        }
        other => panic!("expected Marked, got {other:?}"),
    }
    let stored = store.list_records(id).await.unwrap().len();
    match &deltas[2] {
        RosterDelta::Closed { counts, .. } => assert_eq!(counts.present, stored),
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_shutdown_ends_subscriptions_without_closed() {
    let (store, id) = setup(3).await;
    let feed = feed(&store, FeedConfig::default());
    let mut sub = feed.subscribe(id).await.unwrap();
    sub.recv().await;

    feed.shutdown().await;

    assert!(sub.recv().await.is_none());
    assert_eq!(feed.watched_sessions().await, 0);
}

#[tokio::test]
async fn test_snapshot_serializes_for_dashboards() {
    let (store, id) = setup(2).await;
    commit(&store, id, 1, 1).await;
    let feed = feed(&store, FeedConfig::default());

    let snapshot = feed.snapshot(id).await.unwrap();
    let json = serde_json::to_value(RosterDelta::Snapshot(snapshot)).unwrap();

    assert_eq!(json["type"], "Snapshot");
    assert_eq!(json["counts"]["present"], 1);
}
