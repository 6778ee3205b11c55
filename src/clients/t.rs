use chrono::DateTime;
use chrono::Utc;
use reqwest::Client;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_json::Value;

use super::retry::classify_status;
use super::retry::http_client;
use super::retry::parse_retry_after;
use super::retry::with_total_timeout;
use super::retry::Backoff;
use super::retry::BackoffPolicy;
use super::retry::TokenBucket;
use super::Page;
use super::PageItem;
use super::UpstreamClient;
use crate::error::ClientError;
use crate::webhooks::RegisteredEvent;
use crate::webhooks::WebhookRegistrar;

/// `spec.md` §4.9 step 3 "source-specific static list".
const T_WEBHOOK_EVENTS: &[&str] = &["task.created", "task.updated", "task.deleted"];

#[derive(Deserialize)]
struct RegistrationResponse {
    id: String,
}

/// Client for source T (task management). Basic-auth'd with `T_API_KEY`
/// against a tenant-specific `T_BASE_URL`.
pub struct TClient {
    http: Client,
    base_url: String,
    api_key: Secret<String>,
    limiter: TokenBucket,
    backoff_policy: BackoffPolicy,
}

#[derive(Deserialize)]
struct ListResponse {
    items: Vec<ListItem>,
    next_cursor: Option<String>,
    has_more: bool,
}

#[derive(Deserialize)]
struct ListItem {
    id: String,
    updated_at: DateTime<Utc>,
}

impl TClient {
    pub fn new(base_url: String, api_key: Secret<String>) -> Self {
        Self {
            http: http_client(),
            base_url,
            api_key,
            // conservative default ceiling per `spec.md` §4.3
            limiter: TokenBucket::new(10.0, 5.0),
            backoff_policy: BackoffPolicy::default(),
        }
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
        known_entity: bool,
    ) -> Result<reqwest::Response, ClientError> {
        with_total_timeout(async {
            let mut backoff = Backoff::new(self.backoff_policy);
            loop {
                self.limiter.acquire().await;
                let resp = build()
                    .basic_auth("api", Some(self.api_key.expose_secret()))
                    .send()
                    .await
                    .map_err(|e| ClientError::Transient(e.into()))?;

                let status = resp.status();
                match classify_status(status, known_entity) {
                    None => return Ok(resp),
                    Some(ClientError::Gone(reason)) => return Err(ClientError::Gone(reason)),
                    Some(ClientError::Permanent(e)) => return Err(ClientError::Permanent(e)),
                    Some(ClientError::Transient(e)) => {
                        if backoff.exhausted() {
                            return Err(ClientError::Transient(e));
                        }
                        let delay = parse_retry_after(resp.headers()).unwrap_or_else(|| backoff.next_delay());
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl UpstreamClient for TClient {
    async fn list_updated_since(
        &self,
        since: DateTime<Utc>,
        cursor: Option<String>,
    ) -> Result<Page, ClientError> {
        let url = format!("{}/tasks", self.base_url);
        let since_str = since.to_rfc3339();
        let resp = self
            .send_with_retry(
                || {
                    let mut req = self.http.get(&url).query(&[("updated_since", since_str.as_str())]);
                    if let Some(c) = &cursor {
                        req = req.query(&[("cursor", c.as_str())]);
                    }
                    req
                },
                false,
            )
            .await?;

        let parsed: ListResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Permanent(e.into()))?;

        Ok(Page {
            items: parsed
                .items
                .into_iter()
                .map(|i| PageItem {
                    external_id: i.id,
                    updated_at: i.updated_at,
                })
                .collect(),
            next_cursor: parsed.next_cursor,
            exhausted: !parsed.has_more,
        })
    }

    async fn get(&self, external_id: &str) -> Result<Value, ClientError> {
        let url = format!("{}/tasks/{}", self.base_url, urlencoding::encode(external_id));
        let resp = self.send_with_retry(|| self.http.get(&url), true).await?;
        resp.json().await.map_err(|e| ClientError::Permanent(e.into()))
    }
}

#[async_trait::async_trait]
impl WebhookRegistrar for TClient {
    async fn delete_registration(&self, registration_id: &str) -> Result<(), anyhow::Error> {
        let url = format!("{}/webhooks/{}", self.base_url, urlencoding::encode(registration_id));
        let resp = self
            .http
            .delete(&url)
            .basic_auth("api", Some(self.api_key.expose_secret()))
            .send()
            .await?;
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(anyhow::anyhow!("delete registration failed: {}", resp.status()))
        }
    }

    async fn create_registrations(&self, target_url: &str) -> Result<Vec<RegisteredEvent>, anyhow::Error> {
        let mut created = Vec::with_capacity(T_WEBHOOK_EVENTS.len());
        for event in T_WEBHOOK_EVENTS {
            let url = format!("{}/webhooks", self.base_url);
            let resp = self
                .http
                .post(&url)
                .basic_auth("api", Some(self.api_key.expose_secret()))
                .json(&serde_json::json!({ "url": target_url, "event": event }))
                .send()
                .await?
                .error_for_status()?;
            let parsed: RegistrationResponse = resp.json().await?;
            created.push(RegisteredEvent { registration_id: parsed.id, event: event.to_string() });
        }
        Ok(created)
    }
}
