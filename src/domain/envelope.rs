use chrono::DateTime;
use chrono::Utc;

use super::Source;

/// Unit of work in the durable queue (C1). `id` is the envelope's logical
/// identity — `source:external_id:kind` — so re-enqueuing the same logical
/// event is a no-op (`spec.md` §3 invariant).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "snake_case")]
pub enum EnvelopeKind {
    CreateOrUpdate,
    Delete,
    PageItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "lowercase")]
pub enum EnvelopeState {
    Pending,
    Leased,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: String,
    pub source: Source,
    pub kind: EnvelopeKind,
    pub external_id: String,
    /// Opaque bytes: either the raw webhook body, or a JSON-encoded
    /// `{external_id, updated_at}` descriptor for poller-originated items.
    pub payload: Vec<u8>,
    pub attempts: i32,
    pub state: EnvelopeState,
    pub enqueued_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Envelope {
    pub fn id_for(source: Source, external_id: &str, kind: &EnvelopeKind) -> String {
        let kind_tag = match kind {
            EnvelopeKind::CreateOrUpdate => "create_or_update",
            EnvelopeKind::Delete => "delete",
            EnvelopeKind::PageItem => "page_item",
        };
        format!("{source}:{external_id}:{kind_tag}")
    }

    /// Build a webhook-originated envelope. `payload` is the raw request body.
    pub fn from_webhook(
        source: Source,
        external_id: &str,
        kind: EnvelopeKind,
        payload: Vec<u8>,
    ) -> Self {
        let id = Self::id_for(source, external_id, &kind);
        Self {
            id,
            source,
            kind,
            external_id: external_id.to_string(),
            payload,
            attempts: 0,
            state: EnvelopeState::Pending,
            enqueued_at: Utc::now(),
            leased_until: None,
            last_error: None,
        }
    }

    /// Build a poller-originated descriptor envelope (`spec.md` §4.5 step 5).
    pub fn from_poller_descriptor(
        source: Source,
        external_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let descriptor = PollerDescriptor {
            external_id: external_id.to_string(),
            updated_at,
        };
        let payload =
            serde_json::to_vec(&descriptor).expect("PollerDescriptor always serializes");
        Self::from_webhook(source, external_id, EnvelopeKind::CreateOrUpdate, payload)
    }
}

/// Minimal descriptor carried by poller-originated envelopes; handlers use it
/// to decide whether they already have enough information or must call
/// `C3.get(external_id)`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PollerDescriptor {
    pub external_id: String,
    pub updated_at: DateTime<Utc>,
}
