use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde_json::json;
use serde_json::Value;
use syncguard::clients::Page;
use syncguard::clients::UpstreamClient;
use syncguard::domain::CanonicalRecord;
use syncguard::domain::Envelope;
use syncguard::domain::EnvelopeKind;
use syncguard::domain::Source;
use syncguard::error::ClientError;
use syncguard::handlers::m::MessageHandler;
use syncguard::handlers::t::TaskHandler;
use syncguard::handlers::EventHandler;
use syncguard::identity::IdentityCache;
use syncguard::process_after::parse_process_after;

/// A scripted upstream that either returns a fixed value or a `Gone`,
/// standing in for a real T/M/C client in handler-level tests.
struct ScriptedClient {
    response: Result<Value, ClientErrorKind>,
}

enum ClientErrorKind {
    Gone,
}

#[async_trait::async_trait]
impl UpstreamClient for ScriptedClient {
    async fn list_updated_since(&self, _since: DateTime<Utc>, _cursor: Option<String>) -> Result<Page, ClientError> {
        unimplemented!("handlers under test never call list_updated_since")
    }

    async fn get(&self, _external_id: &str) -> Result<Value, ClientError> {
        match &self.response {
            Ok(v) => Ok(v.clone()),
            Err(ClientErrorKind::Gone) => Err(ClientError::Gone("404".to_string())),
        }
    }
}

fn poller_envelope(source: Source, external_id: &str) -> Envelope {
    Envelope::from_poller_descriptor(source, external_id, Utc::now())
}

/// `spec.md` §8 scenario: "Deletion via 404. Task T99 previously stored...
/// Expected: canonical task T99 has deleted=true."
#[tokio::test]
async fn task_404_on_fetch_converges_to_deleted() {
    let client = Arc::new(ScriptedClient { response: Err(ClientErrorKind::Gone) });
    let handler = TaskHandler::new(client);
    let identity = IdentityCache::new(Duration::from_secs(60), None);

    let records = handler.handle(&poller_envelope(Source::T, "t99"), &identity, None).await.unwrap();

    assert_eq!(records.len(), 1);
    match &records[0] {
        CanonicalRecord::Task(t) => {
            assert_eq!(t.task_id, "t99");
            assert!(t.deleted);
        }
        _ => panic!("expected Task"),
    }
}

/// A "completed" task is not a deleted one — only an explicit delete event
/// or a 404 flips `deleted` (`spec.md` §4.6 "Source T specifics").
#[tokio::test]
async fn completed_task_is_not_marked_deleted() {
    let client = Arc::new(ScriptedClient {
        response: Ok(json!({
            "id": "t1",
            "status": "completed",
            "updated_at": "2024-03-15T00:00:00Z",
        })),
    });
    let handler = TaskHandler::new(client);
    let identity = IdentityCache::new(Duration::from_secs(60), None);

    let records = handler.handle(&poller_envelope(Source::T, "t1"), &identity, None).await.unwrap();

    match &records[0] {
        CanonicalRecord::Task(t) => {
            assert_eq!(t.status.as_deref(), Some("completed"));
            assert!(!t.deleted);
        }
        _ => panic!("expected Task"),
    }
}

#[tokio::test]
async fn explicit_delete_envelope_short_circuits_without_fetching() {
    let client = Arc::new(ScriptedClient { response: Err(ClientErrorKind::Gone) });
    let handler = TaskHandler::new(client);
    let identity = IdentityCache::new(Duration::from_secs(60), None);

    let envelope = Envelope::from_webhook(Source::T, "t1", EnvelopeKind::Delete, b"{}".to_vec());
    let records = handler.handle(&envelope, &identity, None).await.unwrap();

    match &records[0] {
        CanonicalRecord::Task(t) => assert!(t.deleted),
        _ => panic!("expected Task"),
    }
}

#[tokio::test]
async fn task_created_before_process_after_is_dropped() {
    let client = Arc::new(ScriptedClient {
        response: Ok(json!({
            "id": "t1",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        })),
    });
    let handler = TaskHandler::new(client);
    let identity = IdentityCache::new(Duration::from_secs(60), None);
    let threshold = parse_process_after("15.03.2024").unwrap();

    let records = handler.handle(&poller_envelope(Source::T, "t1"), &identity, Some(threshold)).await.unwrap();

    assert!(records.is_empty(), "entities created before the threshold must be dropped, not stored");
}

/// M's conversation fetch fans out into one canonical email per contained
/// message, deduplicated by id.
#[tokio::test]
async fn conversation_fans_out_and_dedups_by_email_id() {
    let client = Arc::new(ScriptedClient {
        response: Ok(json!({
            "messages": [
                {"id": "m1", "updated_at": "2024-03-15T00:00:00Z"},
                {"id": "m2", "updated_at": "2024-03-15T00:00:00Z"},
                {"id": "m1", "updated_at": "2024-03-15T00:00:00Z"},
            ]
        })),
    });
    let handler = MessageHandler::new(client);
    let identity = IdentityCache::new(Duration::from_secs(60), None);

    let records = handler.handle(&poller_envelope(Source::M, "conv-1"), &identity, None).await.unwrap();

    assert_eq!(records.len(), 2, "duplicate message id within one conversation must be deduplicated");
}

/// A single-message fetch (no `messages` array) still produces one record.
#[tokio::test]
async fn single_message_fetch_without_messages_array_yields_one_record() {
    let client = Arc::new(ScriptedClient {
        response: Ok(json!({
            "id": "m1",
            "from": "  Alice@Example.com ",
            "updated_at": "2024-03-15T00:00:00Z",
        })),
    });
    let handler = MessageHandler::new(client);
    let identity = IdentityCache::new(Duration::from_secs(60), None);

    let records = handler.handle(&poller_envelope(Source::M, "m1"), &identity, None).await.unwrap();

    assert_eq!(records.len(), 1);
    match &records[0] {
        CanonicalRecord::Email(e) => assert_eq!(e.from.as_deref(), Some("alice@example.com")),
        _ => panic!("expected Email"),
    }
}

#[tokio::test]
async fn trash_webhook_converges_message_to_deleted() {
    let client = Arc::new(ScriptedClient { response: Err(ClientErrorKind::Gone) });
    let handler = MessageHandler::new(client);
    let identity = IdentityCache::new(Duration::from_secs(60), None);

    let envelope = Envelope::from_webhook(Source::M, "m1", EnvelopeKind::CreateOrUpdate, br#"{"id":"m1","event":"trashed"}"#.to_vec());
    let records = handler.handle(&envelope, &identity, None).await.unwrap();

    match &records[0] {
        CanonicalRecord::Email(e) => assert!(e.deleted),
        _ => panic!("expected Email"),
    }
}
