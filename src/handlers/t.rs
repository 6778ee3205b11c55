use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::non_blank;
use super::EventHandler;
use crate::clients::UpstreamClient;
use crate::domain::CanonicalRecord;
use crate::domain::CanonicalTask;
use crate::domain::Envelope;
use crate::domain::EnvelopeKind;
use crate::domain::PollerDescriptor;
use crate::error::ClientError;
use crate::identity::IdentityCache;
use crate::process_after::passes_process_after;

/// Source T (task management) handler (`spec.md` §4.6 "Source T specifics").
/// "Completed" is not "deleted" — only an explicit delete envelope or a 404
/// on fetch flips `deleted`.
pub struct TaskHandler {
    client: Arc<dyn UpstreamClient>,
}

impl TaskHandler {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self { Self { client } }
}

#[derive(Deserialize)]
struct TaskPayload {
    id: String,
    project_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    #[serde(default)]
    tags: Vec<IdName>,
    #[serde(default)]
    assignees: Vec<IdName>,
    creator: Option<IdName>,
    updater: Option<IdName>,
    due_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct IdName {
    id: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(default)]
    event: Option<String>,
}

#[async_trait::async_trait]
impl EventHandler for TaskHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        identity: &IdentityCache,
        process_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<CanonicalRecord>, ClientError> {
        let (external_id, explicit_delete) = extract(envelope);

        if envelope.kind == EnvelopeKind::Delete || explicit_delete {
            return Ok(vec![deleted_record(&external_id)]);
        }

        let value = match self.client.get(&external_id).await {
            Ok(v) => v,
            Err(ClientError::Gone(_)) => return Ok(vec![deleted_record(&external_id)]),
            Err(e) => return Err(e),
        };

        let task: TaskPayload = serde_json::from_value(value)
            .map_err(|e| ClientError::Permanent(e.into()))?;

        if !passes_process_after(task.created_at, process_after) {
            return Ok(vec![]);
        }

        let mut tag_ids = Vec::with_capacity(task.tags.len());
        let mut tag_names = Vec::with_capacity(task.tags.len());
        for tag in &task.tags {
            tag_ids.push(tag.id.clone());
            tag_names.push(resolve_name(identity, &tag.id, tag.name.as_deref()).await);
        }

        let mut assignee_ids = Vec::with_capacity(task.assignees.len());
        let mut assignee_names = Vec::with_capacity(task.assignees.len());
        for assignee in &task.assignees {
            assignee_ids.push(assignee.id.clone());
            assignee_names.push(resolve_name(identity, &assignee.id, assignee.name.as_deref()).await);
        }

        let (creator_id, creator_name) = match &task.creator {
            Some(c) => (Some(c.id.clone()), Some(resolve_name(identity, &c.id, c.name.as_deref()).await)),
            None => (None, None),
        };
        let (updater_id, updater_name) = match &task.updater {
            Some(u) => (Some(u.id.clone()), Some(resolve_name(identity, &u.id, u.name.as_deref()).await)),
            None => (None, None),
        };

        Ok(vec![CanonicalRecord::Task(CanonicalTask {
            task_id: task.id,
            project_id: non_blank(task.project_id),
            title: non_blank(task.title),
            description: non_blank(task.description),
            status: non_blank(task.status),
            tag_ids,
            tag_names,
            assignee_ids,
            assignee_names,
            creator_id,
            creator_name,
            updater_id,
            updater_name,
            due_at: task.due_at,
            created_at: task.created_at,
            updated_at: task.updated_at,
            deleted: false,
            deleted_at: None,
        })])
    }
}

async fn resolve_name(identity: &IdentityCache, id: &str, hint: Option<&str>) -> String {
    if let Some(hint) = hint {
        identity.put(id, hint).await;
        return hint.to_string();
    }
    identity.resolve(id).await
}

fn deleted_record(task_id: &str) -> CanonicalRecord {
    CanonicalRecord::Task(CanonicalTask {
        task_id: task_id.to_string(),
        deleted: true,
        deleted_at: Some(Utc::now()),
        updated_at: Utc::now(),
        ..Default::default()
    })
}

/// Returns `(external_id, explicit_delete_hint)`. Poller-originated
/// envelopes carry a `PollerDescriptor`; webhook-originated ones carry a
/// raw JSON body whose `event` field, if present, may already say "deleted".
fn extract(envelope: &Envelope) -> (String, bool) {
    if let Ok(descriptor) = serde_json::from_slice::<PollerDescriptor>(&envelope.payload) {
        return (descriptor.external_id, false);
    }
    match serde_json::from_slice::<WebhookEnvelope>(&envelope.payload) {
        Ok(body) => {
            let is_delete = body
                .event
                .as_deref()
                .map(|e| e.eq_ignore_ascii_case("deleted") || e.eq_ignore_ascii_case("delete"))
                .unwrap_or(false);
            (body.id, is_delete)
        }
        Err(_) => (envelope.external_id.clone(), false),
    }
}
