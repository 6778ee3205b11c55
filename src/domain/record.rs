use chrono::DateTime;
use chrono::Utc;

/// `spec.md` §3 "Canonical Task" (source T).
#[derive(Debug, Clone, Default)]
pub struct CanonicalTask {
    pub task_id: String,
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub tag_ids: Vec<String>,
    pub tag_names: Vec<String>,
    pub assignee_ids: Vec<String>,
    pub assignee_names: Vec<String>,
    pub creator_id: Option<String>,
    pub creator_name: Option<String>,
    pub updater_id: Option<String>,
    pub updater_name: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// `spec.md` §3 "Canonical Email" (source M).
#[derive(Debug, Clone, Default)]
pub struct CanonicalEmail {
    pub email_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    pub source_url: Option<String>,
    /// Populated only when `Sink::requires_staged_attachments()` is true and
    /// the handler has downloaded the bytes before emitting the record.
    pub staged_bytes: Option<Vec<u8>>,
}

/// `SPEC_FULL.md` §3 (supplement) "Canonical Doc" (source C).
#[derive(Debug, Clone, Default)]
pub struct CanonicalDoc {
    pub doc_id: String,
    pub title: Option<String>,
    pub mime_type: Option<String>,
    pub body_text: Option<String>,
    pub source_url: Option<String>,
    pub owner_id: Option<String>,
    pub owner_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// What a handler (C6) hands back to the dispatcher (C8) for a single
/// envelope. A handler may emit zero, one, or many records (source M fans
/// conversations out into one record per contained message).
#[derive(Debug, Clone)]
pub enum CanonicalRecord {
    Task(CanonicalTask),
    Email(CanonicalEmail),
    Doc(CanonicalDoc),
}
