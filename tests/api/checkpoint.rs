use chrono::Duration;
use chrono::Utc;
use sqlx::PgPool;
use syncguard::checkpoint::Checkpoint;
use syncguard::checkpoint::CheckpointStore;
use syncguard::domain::Source;

#[sqlx::test]
async fn get_is_none_before_first_set(pool: PgPool) {
    let store = CheckpointStore::new(pool);
    assert!(store.get(Source::T).await.unwrap().is_none());
}

#[sqlx::test]
async fn set_then_get_round_trips(pool: PgPool) {
    let store = CheckpointStore::new(pool);
    let now = Utc::now();
    store.set(&Checkpoint { source: Source::T, last_event_time: now, last_cursor: Some("c1".into()) }).await.unwrap();

    let ckpt = store.get(Source::T).await.unwrap().unwrap();
    assert_eq!(ckpt.last_event_time, now);
    assert_eq!(ckpt.last_cursor.as_deref(), Some("c1"));
}

/// `spec.md` P3: the high-water-mark never moves backward, even if a caller
/// tries to set an earlier value than what's stored.
#[sqlx::test]
async fn high_water_mark_never_moves_backward(pool: PgPool) {
    let store = CheckpointStore::new(pool);
    let later = Utc::now();
    let earlier = later - Duration::hours(1);

    store.set(&Checkpoint { source: Source::T, last_event_time: later, last_cursor: None }).await.unwrap();
    store.set(&Checkpoint { source: Source::T, last_event_time: earlier, last_cursor: Some("stale".into()) }).await.unwrap();

    let ckpt = store.get(Source::T).await.unwrap().unwrap();
    assert_eq!(ckpt.last_event_time, later, "GREATEST must clamp against a backward update");
    assert_eq!(ckpt.last_cursor.as_deref(), Some("stale"), "cursor always tracks the latest call regardless of time clamp");
}

#[sqlx::test]
async fn checkpoints_are_independent_per_source(pool: PgPool) {
    let store = CheckpointStore::new(pool);
    let now = Utc::now();
    store.set(&Checkpoint { source: Source::T, last_event_time: now, last_cursor: None }).await.unwrap();

    assert!(store.get(Source::M).await.unwrap().is_none());
    assert!(store.get(Source::T).await.unwrap().is_some());
}
