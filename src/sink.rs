use sqlx::PgPool;

use crate::domain::CanonicalDoc;
use crate::domain::CanonicalEmail;
use crate::domain::CanonicalTask;
use crate::queue::PgTransaction;

/// C7: idempotent batch upserts and soft-delete into the target store.
/// Upsert is merge-not-replace — fields absent (`None`/empty) in the
/// canonical record leave the stored value untouched, via `COALESCE`.
pub struct Sink {
    pool: PgPool,
}

/// Whether this sink needs attachment bytes staged before upsert, or can
/// just record the `source_url` (`spec.md` §4.6 "Source M specifics").
pub fn requires_staged_attachments() -> bool { false }

impl Sink {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub fn pool(&self) -> &PgPool { &self.pool }

    #[tracing::instrument(skip(self, tasks))]
    pub async fn upsert_tasks(
        &self,
        tx: &mut PgTransaction,
        tasks: &[CanonicalTask],
    ) -> Result<(), anyhow::Error> {
        for task in tasks {
            sqlx::query!(
                r#"
                INSERT INTO canonical_tasks
                    (task_id, project_id, title, description, status, tag_ids, tag_names,
                     assignee_ids, assignee_names, creator_id, creator_name, updater_id,
                     updater_name, due_at, created_at, updated_at, deleted, deleted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                ON CONFLICT (task_id) DO UPDATE SET
                    project_id     = COALESCE(EXCLUDED.project_id, canonical_tasks.project_id),
                    title          = COALESCE(EXCLUDED.title, canonical_tasks.title),
                    description    = COALESCE(EXCLUDED.description, canonical_tasks.description),
                    status         = COALESCE(EXCLUDED.status, canonical_tasks.status),
                    tag_ids        = COALESCE(EXCLUDED.tag_ids, canonical_tasks.tag_ids),
                    tag_names      = COALESCE(EXCLUDED.tag_names, canonical_tasks.tag_names),
                    assignee_ids   = COALESCE(EXCLUDED.assignee_ids, canonical_tasks.assignee_ids),
                    assignee_names = COALESCE(EXCLUDED.assignee_names, canonical_tasks.assignee_names),
                    creator_id     = COALESCE(EXCLUDED.creator_id, canonical_tasks.creator_id),
                    creator_name   = COALESCE(EXCLUDED.creator_name, canonical_tasks.creator_name),
                    updater_id     = COALESCE(EXCLUDED.updater_id, canonical_tasks.updater_id),
                    updater_name   = COALESCE(EXCLUDED.updater_name, canonical_tasks.updater_name),
                    due_at         = COALESCE(EXCLUDED.due_at, canonical_tasks.due_at),
                    updated_at     = EXCLUDED.updated_at,
                    deleted        = EXCLUDED.deleted OR canonical_tasks.deleted,
                    deleted_at     = COALESCE(canonical_tasks.deleted_at, EXCLUDED.deleted_at)
                "#,
                task.task_id,
                task.project_id,
                task.title,
                task.description,
                task.status,
                &task.tag_ids,
                &task.tag_names,
                &task.assignee_ids,
                &task.assignee_names,
                task.creator_id,
                task.creator_name,
                task.updater_id,
                task.updater_name,
                task.due_at,
                task.created_at,
                task.updated_at,
                task.deleted,
                task.deleted_at,
            )
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, emails))]
    pub async fn upsert_emails(
        &self,
        tx: &mut PgTransaction,
        emails: &[CanonicalEmail],
    ) -> Result<(), anyhow::Error> {
        for email in emails {
            sqlx::query!(
                r#"
                INSERT INTO canonical_emails
                    (email_id, thread_id, subject, "from", "to", cc, bcc, body_text, body_html,
                     sent_at, received_at, labels, created_at, updated_at, deleted, deleted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (email_id) DO UPDATE SET
                    thread_id   = COALESCE(EXCLUDED.thread_id, canonical_emails.thread_id),
                    subject     = COALESCE(EXCLUDED.subject, canonical_emails.subject),
                    "from"      = COALESCE(EXCLUDED."from", canonical_emails."from"),
                    "to"        = COALESCE(EXCLUDED."to", canonical_emails."to"),
                    cc          = COALESCE(EXCLUDED.cc, canonical_emails.cc),
                    bcc         = COALESCE(EXCLUDED.bcc, canonical_emails.bcc),
                    body_text   = COALESCE(EXCLUDED.body_text, canonical_emails.body_text),
                    body_html   = COALESCE(EXCLUDED.body_html, canonical_emails.body_html),
                    sent_at     = COALESCE(EXCLUDED.sent_at, canonical_emails.sent_at),
                    received_at = COALESCE(EXCLUDED.received_at, canonical_emails.received_at),
                    labels      = COALESCE(EXCLUDED.labels, canonical_emails.labels),
                    updated_at  = EXCLUDED.updated_at,
                    deleted     = EXCLUDED.deleted OR canonical_emails.deleted,
                    deleted_at  = COALESCE(canonical_emails.deleted_at, EXCLUDED.deleted_at)
                "#,
                email.email_id,
                email.thread_id,
                email.subject,
                email.from,
                &email.to,
                &email.cc,
                &email.bcc,
                email.body_text,
                email.body_html,
                email.sent_at,
                email.received_at,
                &email.labels,
                email.created_at,
                email.updated_at,
                email.deleted,
                email.deleted_at,
            )
            .execute(&mut **tx)
            .await?;

            for attachment in &email.attachments {
                sqlx::query!(
                    r#"
                    INSERT INTO email_attachments
                        (email_id, filename, content_type, size_bytes, source_url, staged_bytes)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (email_id, filename) DO UPDATE SET
                        content_type = COALESCE(EXCLUDED.content_type, email_attachments.content_type),
                        size_bytes   = COALESCE(EXCLUDED.size_bytes, email_attachments.size_bytes),
                        source_url   = COALESCE(EXCLUDED.source_url, email_attachments.source_url),
                        staged_bytes = COALESCE(EXCLUDED.staged_bytes, email_attachments.staged_bytes)
                    "#,
                    email.email_id,
                    attachment.filename,
                    attachment.content_type,
                    attachment.size,
                    attachment.source_url,
                    attachment.staged_bytes,
                )
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, docs))]
    pub async fn upsert_docs(
        &self,
        tx: &mut PgTransaction,
        docs: &[CanonicalDoc],
    ) -> Result<(), anyhow::Error> {
        for doc in docs {
            sqlx::query!(
                r#"
                INSERT INTO canonical_docs
                    (doc_id, title, mime_type, body_text, source_url, owner_id, owner_name,
                     created_at, updated_at, deleted, deleted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (doc_id) DO UPDATE SET
                    title      = COALESCE(EXCLUDED.title, canonical_docs.title),
                    mime_type  = COALESCE(EXCLUDED.mime_type, canonical_docs.mime_type),
                    body_text  = COALESCE(EXCLUDED.body_text, canonical_docs.body_text),
                    source_url = COALESCE(EXCLUDED.source_url, canonical_docs.source_url),
                    owner_id   = COALESCE(EXCLUDED.owner_id, canonical_docs.owner_id),
                    owner_name = COALESCE(EXCLUDED.owner_name, canonical_docs.owner_name),
                    updated_at = EXCLUDED.updated_at,
                    deleted    = EXCLUDED.deleted OR canonical_docs.deleted,
                    deleted_at = COALESCE(canonical_docs.deleted_at, EXCLUDED.deleted_at)
                "#,
                doc.doc_id,
                doc.title,
                doc.mime_type,
                doc.body_text,
                doc.source_url,
                doc.owner_id,
                doc.owner_name,
                doc.created_at,
                doc.updated_at,
                doc.deleted,
                doc.deleted_at,
            )
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Cheap reachability probe for `GET /health`.
    pub async fn ping(&self) -> bool { sqlx::query("SELECT 1").execute(&self.pool).await.is_ok() }
}
