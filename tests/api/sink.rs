use chrono::Utc;
use sqlx::PgPool;
use syncguard::domain::CanonicalTask;
use syncguard::sink::Sink;

fn base_task(id: &str) -> CanonicalTask {
    CanonicalTask {
        task_id: id.to_string(),
        title: Some("original title".to_string()),
        status: Some("open".to_string()),
        updated_at: Utc::now(),
        ..Default::default()
    }
}

/// `spec.md` §4.7 "merge, not replace": a later upsert with a field left
/// `None` must not clobber a previously-stored value for that field.
#[sqlx::test]
async fn upsert_merges_absent_fields_instead_of_clobbering(pool: PgPool) {
    let sink = Sink::new(pool);

    let mut tx = sink.pool().begin().await.unwrap();
    sink.upsert_tasks(&mut tx, &[base_task("t1")]).await.unwrap();
    tx.commit().await.unwrap();

    let mut partial = CanonicalTask { task_id: "t1".to_string(), status: Some("done".to_string()), updated_at: Utc::now(), ..Default::default() };
    partial.title = None;

    let mut tx = sink.pool().begin().await.unwrap();
    sink.upsert_tasks(&mut tx, &[partial]).await.unwrap();
    tx.commit().await.unwrap();

    let row = sqlx::query!(r#"SELECT title, status FROM canonical_tasks WHERE task_id = 't1'"#)
        .fetch_one(sink.pool())
        .await
        .unwrap();
    assert_eq!(row.title.as_deref(), Some("original title"));
    assert_eq!(row.status.as_deref(), Some("done"));
}

/// §4.7 deletion convergence: once `deleted` is true it stays true even if a
/// stale, pre-deletion record is replayed afterward.
#[sqlx::test]
async fn deleted_flag_is_sticky(pool: PgPool) {
    let sink = Sink::new(pool);

    let mut deleted = base_task("t1");
    deleted.deleted = true;
    deleted.deleted_at = Some(Utc::now());

    let mut tx = sink.pool().begin().await.unwrap();
    sink.upsert_tasks(&mut tx, &[deleted]).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = sink.pool().begin().await.unwrap();
    sink.upsert_tasks(&mut tx, &[base_task("t1")]).await.unwrap();
    tx.commit().await.unwrap();

    let row = sqlx::query!(r#"SELECT deleted FROM canonical_tasks WHERE task_id = 't1'"#)
        .fetch_one(sink.pool())
        .await
        .unwrap();
    assert!(row.deleted);
}

#[sqlx::test]
async fn upsert_batch_larger_than_chunk_size_all_land(pool: PgPool) {
    let sink = Sink::new(pool);
    let tasks: Vec<CanonicalTask> = (0..25).map(|i| base_task(&format!("t{i}"))).collect();

    let mut tx = sink.pool().begin().await.unwrap();
    for chunk in tasks.chunks(10) {
        sink.upsert_tasks(&mut tx, chunk).await.unwrap();
    }
    tx.commit().await.unwrap();

    let row = sqlx::query!(r#"SELECT count(*) AS "count!" FROM canonical_tasks"#).fetch_one(sink.pool()).await.unwrap();
    assert_eq!(row.count, 25);
}

#[sqlx::test]
async fn ping_reports_reachability(pool: PgPool) {
    let sink = Sink::new(pool);
    assert!(sink.ping().await);
}
