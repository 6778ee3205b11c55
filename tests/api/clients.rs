use chrono::Utc;
use secrecy::Secret;
use serde_json::json;
use syncguard::clients::c::CClient;
use syncguard::clients::m::MClient;
use syncguard::clients::t::TClient;
use syncguard::clients::UpstreamClient;
use syncguard::error::ClientError;
use syncguard::webhooks::WebhookRegistrar;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

#[tokio::test]
async fn list_updated_since_parses_a_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "t1", "updated_at": "2024-03-15T00:00:00Z"}],
            "next_cursor": null,
            "has_more": false,
        })))
        .mount(&server)
        .await;

    let client = TClient::new(server.uri(), Secret::new("key".to_string()));
    let page = client.list_updated_since(Utc::now(), None).await.unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].external_id, "t1");
    assert!(page.exhausted);
}

/// `spec.md` §4.5/§7: a 404 on a previously-known entity is a deletion, not
/// a failure.
#[tokio::test]
async fn get_maps_404_to_gone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = TClient::new(server.uri(), Secret::new("key".to_string()));
    match client.get("t1").await {
        Err(ClientError::Gone(_)) => {}
        other => panic!("expected Gone, got {other:?}"),
    }
}

/// §4.3: 429/5xx are retried with backoff; a response that recovers on the
/// second attempt must still surface as success to the caller.
#[tokio::test]
async fn transient_5xx_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tasks/t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t1",
            "updated_at": "2024-03-15T00:00:00Z",
        })))
        .mount(&server)
        .await;

    let client = TClient::new(server.uri(), Secret::new("key".to_string()));
    let value = client.get("t1").await.unwrap();
    assert_eq!(value["id"], "t1");
}

#[tokio::test]
async fn non_404_client_error_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tasks/t1"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let client = TClient::new(server.uri(), Secret::new("key".to_string()));
    match client.get("t1").await {
        Err(ClientError::Permanent(_)) => {}
        other => panic!("expected Permanent, got {other:?}"),
    }
}

#[tokio::test]
async fn m_client_fetches_a_message_with_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m1",
            "updated_at": "2024-03-15T00:00:00Z",
        })))
        .mount(&server)
        .await;

    let client = MClient::with_base_url(server.uri(), Secret::new("token".to_string()));
    let value = client.get("m1").await.unwrap();
    assert_eq!(value["id"], "m1");
}

/// `spec.md` §4.9 "ignore 404s": deleting an already-gone registration must
/// still be treated as success.
#[tokio::test]
async fn delete_registration_treats_404_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/webhooks/reg-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = TClient::new(server.uri(), Secret::new("key".to_string()));
    client.delete_registration("reg-1").await.unwrap();
}

#[tokio::test]
async fn create_registrations_registers_every_source_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "reg-x"})))
        .mount(&server)
        .await;

    let client = TClient::new(server.uri(), Secret::new("key".to_string()));
    let events = client.create_registrations("https://ingress.example.com").await.unwrap();
    assert_eq!(events.len(), 3, "one registration per task.{{created,updated,deleted}}");
}

#[tokio::test]
async fn doc_client_lists_and_fetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{"id": "d1", "updated_at": "2024-03-15T00:00:00Z"}],
            "next_cursor": "page-2",
            "has_more": true,
        })))
        .mount(&server)
        .await;

    let client = CClient::new(server.uri());
    let page = client.list_updated_since(Utc::now(), None).await.unwrap();
    assert_eq!(page.items[0].external_id, "d1");
    assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
    assert!(!page.exhausted);
}
