use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::canonical_address;
use super::non_blank;
use super::EventHandler;
use crate::clients::UpstreamClient;
use crate::domain::Attachment;
use crate::domain::CanonicalEmail;
use crate::domain::CanonicalRecord;
use crate::domain::Envelope;
use crate::domain::EnvelopeKind;
use crate::domain::PollerDescriptor;
use crate::error::ClientError;
use crate::identity::IdentityCache;
use crate::process_after::passes_process_after;
use crate::sink;

/// Source M (shared inbox) handler (`spec.md` §4.6 "Source M specifics"). A
/// webhook body may describe a conversation (fanned out into one record per
/// contained message, deduplicated by `email_id`), a single message, or a
/// trashing event.
pub struct MessageHandler {
    client: Arc<dyn UpstreamClient>,
}

impl MessageHandler {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self { Self { client } }
}

#[derive(Deserialize)]
struct MessagePayload {
    id: String,
    thread_id: Option<String>,
    subject: Option<String>,
    from: Option<String>,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    cc: Vec<String>,
    #[serde(default)]
    bcc: Vec<String>,
    body_text: Option<String>,
    body_html: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    attachments: Vec<AttachmentPayload>,
    created_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct AttachmentPayload {
    filename: String,
    content_type: Option<String>,
    size: Option<i64>,
    url: Option<String>,
}

/// Conversation fetch fans out into its contained messages.
#[derive(Deserialize)]
struct ConversationPayload {
    #[serde(default)]
    messages: Vec<MessagePayload>,
}

#[derive(Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(default)]
    event: Option<String>,
}

#[async_trait::async_trait]
impl EventHandler for MessageHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        identity: &IdentityCache,
        process_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<CanonicalRecord>, ClientError> {
        let (external_id, trashed) = extract(envelope);

        if envelope.kind == EnvelopeKind::Delete || trashed {
            return Ok(vec![deleted_record(&external_id)]);
        }

        let value = match self.client.get(&external_id).await {
            Ok(v) => v,
            Err(ClientError::Gone(_)) => return Ok(vec![deleted_record(&external_id)]),
            Err(e) => return Err(e),
        };

        // a conversation carries a `messages` array; a single message fetch
        // does not, so a missing/empty field there just yields one message.
        let messages: Vec<MessagePayload> =
            if let Ok(conversation) = serde_json::from_value::<ConversationPayload>(value.clone()) {
                if !conversation.messages.is_empty() {
                    conversation.messages
                } else {
                    vec![serde_json::from_value(value).map_err(|e| ClientError::Permanent(e.into()))?]
                }
            } else {
                vec![serde_json::from_value(value).map_err(|e| ClientError::Permanent(e.into()))?]
            };

        let mut seen = std::collections::HashSet::new();
        let mut records = Vec::new();
        for message in messages {
            if !seen.insert(message.id.clone()) {
                continue;
            }
            if !passes_process_after(message.created_at, process_after) {
                continue;
            }
            records.push(CanonicalRecord::Email(build_email(identity, message).await));
        }
        Ok(records)
    }
}

async fn build_email(identity: &IdentityCache, message: MessagePayload) -> CanonicalEmail {
    let from = message.from.as_deref().map(canonical_address);
    if let Some(from) = &from {
        identity.put(from, from).await;
    }

    let stage = sink::requires_staged_attachments();
    let attachments = message
        .attachments
        .into_iter()
        .map(|a| Attachment {
            filename: a.filename,
            content_type: a.content_type,
            size: a.size,
            source_url: a.url,
            staged_bytes: if stage { Some(Vec::new()) } else { None },
        })
        .collect();

    CanonicalEmail {
        email_id: message.id,
        thread_id: non_blank(message.thread_id),
        subject: non_blank(message.subject),
        from,
        to: message.to.iter().map(|a| canonical_address(a)).collect(),
        cc: message.cc.iter().map(|a| canonical_address(a)).collect(),
        bcc: message.bcc.iter().map(|a| canonical_address(a)).collect(),
        body_text: non_blank(message.body_text),
        body_html: non_blank(message.body_html),
        sent_at: message.sent_at,
        received_at: message.received_at,
        labels: message.labels,
        attachments,
        created_at: message.created_at,
        updated_at: message.updated_at,
        deleted: false,
        deleted_at: None,
    }
}

fn deleted_record(email_id: &str) -> CanonicalRecord {
    CanonicalRecord::Email(CanonicalEmail {
        email_id: email_id.to_string(),
        deleted: true,
        deleted_at: Some(Utc::now()),
        updated_at: Utc::now(),
        ..Default::default()
    })
}

fn extract(envelope: &Envelope) -> (String, bool) {
    if let Ok(descriptor) = serde_json::from_slice::<PollerDescriptor>(&envelope.payload) {
        return (descriptor.external_id, false);
    }
    match serde_json::from_slice::<WebhookEnvelope>(&envelope.payload) {
        Ok(body) => {
            let trashed = body
                .event
                .as_deref()
                .map(|e| e.eq_ignore_ascii_case("trashed") || e.eq_ignore_ascii_case("trash"))
                .unwrap_or(false);
            (body.id, trashed)
        }
        Err(_) => (envelope.external_id.clone(), false),
    }
}
