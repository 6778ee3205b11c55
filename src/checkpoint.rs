use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;

use crate::domain::Source;

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub source: Source,
    pub last_event_time: DateTime<Utc>,
    pub last_cursor: Option<String>,
}

/// C2: per-source high-water-mark. `last_event_time` only ever advances
/// after the corresponding poll page has been durably enqueued (`spec.md`
/// §4.2) — the queue is the hand-off point, not this store.
pub struct CheckpointStore {
    pool: PgPool,
}

impl CheckpointStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn get(&self, source: Source) -> Result<Option<Checkpoint>, anyhow::Error> {
        let row = sqlx::query!(
            r#"SELECT last_event_time, last_cursor FROM checkpoints WHERE source = $1"#,
            source.to_string(),
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Checkpoint {
            source,
            last_event_time: r.last_event_time,
            last_cursor: r.last_cursor,
        }))
    }

    /// Upsert, clamping to monotonic non-decrease (`spec.md` P3). Silently
    /// keeps the existing value if `checkpoint.last_event_time` would move
    /// the high-water-mark backwards — this should never happen if callers
    /// follow the "only after enqueue succeeds" rule, but the store itself
    /// enforces the invariant rather than trusting callers.
    #[tracing::instrument(skip(self))]
    pub async fn set(&self, checkpoint: &Checkpoint) -> Result<(), anyhow::Error> {
        sqlx::query!(
            r#"
            INSERT INTO checkpoints (source, last_event_time, last_cursor)
            VALUES ($1, $2, $3)
            ON CONFLICT (source) DO UPDATE
            SET last_event_time = GREATEST(checkpoints.last_event_time, EXCLUDED.last_event_time),
                last_cursor = EXCLUDED.last_cursor
            "#,
            checkpoint.source.to_string(),
            checkpoint.last_event_time,
            checkpoint.last_cursor,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
