use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::non_blank;
use super::EventHandler;
use crate::clients::UpstreamClient;
use crate::domain::CanonicalDoc;
use crate::domain::CanonicalRecord;
use crate::domain::Envelope;
use crate::domain::EnvelopeKind;
use crate::domain::PollerDescriptor;
use crate::error::ClientError;
use crate::identity::IdentityCache;
use crate::process_after::passes_process_after;

/// Source C (documents) handler. No webhooks — poller-originated descriptors
/// only (`spec.md` §4.6 "Source C specifics").
pub struct DocHandler {
    client: Arc<dyn UpstreamClient>,
}

impl DocHandler {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self { Self { client } }
}

#[derive(Deserialize)]
struct DocPayload {
    id: String,
    title: Option<String>,
    mime_type: Option<String>,
    body_text: Option<String>,
    source_url: Option<String>,
    owner: Option<IdName>,
    created_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct IdName {
    id: String,
    name: Option<String>,
}

#[async_trait::async_trait]
impl EventHandler for DocHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        identity: &IdentityCache,
        process_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<CanonicalRecord>, ClientError> {
        let external_id = match serde_json::from_slice::<PollerDescriptor>(&envelope.payload) {
            Ok(descriptor) => descriptor.external_id,
            Err(_) => envelope.external_id.clone(),
        };

        if envelope.kind == EnvelopeKind::Delete {
            return Ok(vec![deleted_record(&external_id)]);
        }

        let value = match self.client.get(&external_id).await {
            Ok(v) => v,
            Err(ClientError::Gone(_)) => return Ok(vec![deleted_record(&external_id)]),
            Err(e) => return Err(e),
        };

        let doc: DocPayload = serde_json::from_value(value).map_err(|e| ClientError::Permanent(e.into()))?;

        if !passes_process_after(doc.created_at, process_after) {
            return Ok(vec![]);
        }

        let (owner_id, owner_name) = match &doc.owner {
            Some(o) => {
                let name = match o.name.as_deref() {
                    Some(n) => {
                        identity.put(&o.id, n).await;
                        n.to_string()
                    }
                    None => identity.resolve(&o.id).await,
                };
                (Some(o.id.clone()), Some(name))
            }
            None => (None, None),
        };

        Ok(vec![CanonicalRecord::Doc(CanonicalDoc {
            doc_id: doc.id,
            title: non_blank(doc.title),
            mime_type: non_blank(doc.mime_type),
            body_text: non_blank(doc.body_text),
            source_url: non_blank(doc.source_url),
            owner_id,
            owner_name,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            deleted: false,
            deleted_at: None,
        })])
    }
}

fn deleted_record(doc_id: &str) -> CanonicalRecord {
    CanonicalRecord::Doc(CanonicalDoc {
        doc_id: doc_id.to_string(),
        deleted: true,
        deleted_at: Some(Utc::now()),
        updated_at: Utc::now(),
        ..Default::default()
    })
}
