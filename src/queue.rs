use chrono::Duration as ChronoDuration;
use chrono::Utc;
use sqlx::Executor;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Transaction;

use crate::domain::Envelope;
use crate::domain::EnvelopeKind;
use crate::domain::EnvelopeState;
use crate::domain::Source;

pub type PgTransaction = Transaction<'static, Postgres>;

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Inserted,
    Duplicate,
}

/// C1: the durable queue. Every operation is a plain `sqlx` call against the
/// `queue_envelopes` table shared with the sink (C7), so that "apply the
/// sink writes and retire the envelope" can be one transaction — the same
/// trick the teacher's `delivery::dequeue`/`delete_task` pair uses for
/// "lease, then delete on success."
pub struct Queue {
    pool: PgPool,
}

impl Queue {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Idempotent insert. Inserting an `id` that already exists is a no-op
    /// (`spec.md` §4.1).
    #[tracing::instrument(skip(self, envelope), fields(id = %envelope.id))]
    pub async fn enqueue(&self, envelope: &Envelope) -> Result<EnqueueOutcome, anyhow::Error> {
        let kind = kind_tag(&envelope.kind);
        let result = sqlx::query!(
            r#"
            INSERT INTO queue_envelopes
                (id, source, kind, external_id, payload, attempts, state, enqueued_at)
            VALUES ($1, $2, $3, $4, $5, 0, 'pending', $6)
            ON CONFLICT (id) DO NOTHING
            "#,
            envelope.id,
            envelope.source.to_string(),
            kind,
            envelope.external_id,
            envelope.payload,
            envelope.enqueued_at,
        )
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            EnqueueOutcome::Inserted
        } else {
            EnqueueOutcome::Duplicate
        })
    }

    /// Lease up to `batch_size` envelopes for `source`, oldest first. Also
    /// reclaims envelopes whose lease has expired (`spec.md` §4.1 "Lease
    /// expiry"). Uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// double-lease the same row (`spec.md` §5).
    #[tracing::instrument(skip(self))]
    pub async fn lease(
        &self,
        source: Source,
        batch_size: i64,
        lease_duration: std::time::Duration,
    ) -> Result<Vec<Envelope>, anyhow::Error> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let leased_until = now + ChronoDuration::from_std(lease_duration)?;

        let rows = sqlx::query!(
            r#"
            SELECT id, source, kind, external_id, payload, attempts, state,
                   enqueued_at, leased_until, last_error
            FROM queue_envelopes
            WHERE source = $1
              AND (
                    (state = 'pending' AND (leased_until IS NULL OR leased_until < $2))
                    OR (state = 'leased' AND leased_until < $2)
                  )
            ORDER BY enqueued_at
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
            source.to_string(),
            now,
            batch_size,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut leased = Vec::with_capacity(rows.len());
        for row in rows {
            sqlx::query!(
                r#"UPDATE queue_envelopes SET state = 'leased', leased_until = $1 WHERE id = $2"#,
                leased_until,
                row.id,
            )
            .execute(&mut *tx)
            .await?;

            leased.push(Envelope {
                id: row.id,
                source,
                kind: parse_kind(&row.kind),
                external_id: row.external_id,
                payload: row.payload,
                attempts: row.attempts,
                state: EnvelopeState::Leased,
                enqueued_at: row.enqueued_at,
                leased_until: Some(leased_until),
                last_error: row.last_error,
            });
        }

        tx.commit().await?;
        Ok(leased)
    }

    /// Retire an envelope as part of the caller's own transaction (§4.1
    /// "Durability": apply + retire must be atomic). Callers that don't have
    /// a transaction of their own can use `complete` below.
    pub async fn complete_in(
        tx: &mut PgTransaction,
        envelope_id: &str,
    ) -> Result<(), anyhow::Error> {
        let query = sqlx::query!(
            r#"UPDATE queue_envelopes SET state = 'completed' WHERE id = $1"#,
            envelope_id,
        );
        tx.execute(query).await?;
        Ok(())
    }

    pub async fn complete(&self, envelope_id: &str) -> Result<(), anyhow::Error> {
        let mut tx = self.pool.begin().await?;
        Self::complete_in(&mut tx, envelope_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record a failed attempt. Returns the new attempt count. Once
    /// `attempts >= max_attempts` (or `force_permanent` is set by the caller
    /// for a classified-permanent error) the envelope moves to `failed` and
    /// stays visible for manual requeue; otherwise it becomes eligible for
    /// re-lease after `retry_delay`.
    #[tracing::instrument(skip(self, error))]
    pub async fn fail(
        &self,
        envelope_id: &str,
        error: &str,
        max_attempts: i32,
        retry_delay: std::time::Duration,
        force_permanent: bool,
    ) -> Result<i32, anyhow::Error> {
        let row = sqlx::query!(
            r#"SELECT attempts FROM queue_envelopes WHERE id = $1"#,
            envelope_id,
        )
        .fetch_one(&self.pool)
        .await?;
        let new_attempts = row.attempts + 1;

        if force_permanent || new_attempts >= max_attempts {
            sqlx::query!(
                r#"
                UPDATE queue_envelopes
                SET attempts = $1, state = 'failed', last_error = $2, leased_until = NULL
                WHERE id = $3
                "#,
                new_attempts,
                error,
                envelope_id,
            )
            .execute(&self.pool)
            .await?;
        } else {
            let retry_delay = ChronoDuration::from_std(retry_delay)?;
            let available_at = Utc::now() + retry_delay;
            sqlx::query!(
                r#"
                UPDATE queue_envelopes
                SET attempts = $1, state = 'pending', last_error = $2, leased_until = $3
                WHERE id = $4
                "#,
                new_attempts,
                error,
                // `leased_until` doubles as "not eligible before" for pending
                // rows; `lease`'s WHERE clause checks it for both states.
                available_at,
                envelope_id,
            )
            .execute(&self.pool)
            .await?;
        }

        Ok(new_attempts)
    }

    pub async fn list(
        &self,
        state: EnvelopeState,
        source: Option<Source>,
    ) -> Result<Vec<Envelope>, anyhow::Error> {
        let state_tag = state_tag(state);
        let rows = sqlx::query!(
            r#"
            SELECT id, source, kind, external_id, payload, attempts, state,
                   enqueued_at, leased_until, last_error
            FROM queue_envelopes
            WHERE state = $1 AND ($2::text IS NULL OR source = $2)
            ORDER BY enqueued_at
            "#,
            state_tag,
            source.map(|s| s.to_string()),
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Envelope {
                id: row.id,
                source: row.source.parse().expect("source column is always valid"),
                kind: parse_kind(&row.kind),
                external_id: row.external_id,
                payload: row.payload,
                attempts: row.attempts,
                state,
                enqueued_at: row.enqueued_at,
                leased_until: row.leased_until,
                last_error: row.last_error,
            })
            .collect())
    }

    /// Counts per state, for `GET /health` and the `status` CLI command.
    pub async fn depth_by_state(&self) -> Result<Vec<(String, i64)>, anyhow::Error> {
        let rows = sqlx::query!(
            r#"SELECT state, count(*) AS "count!" FROM queue_envelopes GROUP BY state"#
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.state, r.count)).collect())
    }
}

fn kind_tag(kind: &EnvelopeKind) -> &'static str {
    match kind {
        EnvelopeKind::CreateOrUpdate => "create_or_update",
        EnvelopeKind::Delete => "delete",
        EnvelopeKind::PageItem => "page_item",
    }
}

fn parse_kind(s: &str) -> EnvelopeKind {
    match s {
        "delete" => EnvelopeKind::Delete,
        "page_item" => EnvelopeKind::PageItem,
        _ => EnvelopeKind::CreateOrUpdate,
    }
}

fn state_tag(state: EnvelopeState) -> &'static str {
    match state {
        EnvelopeState::Pending => "pending",
        EnvelopeState::Leased => "leased",
        EnvelopeState::Completed => "completed",
        EnvelopeState::Failed => "failed",
    }
}
