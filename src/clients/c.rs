use chrono::DateTime;
use chrono::Utc;
use reqwest::Client;
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

/// Client for the optional source C (documents). No webhooks — enabled only
/// when `C_BASE_URL` is configured; driven entirely by the poller.
pub struct CClient {
    http: Client,
    base_url: String,
    limiter: TokenBucket,
    backoff_policy: BackoffPolicy,
}

#[derive(Deserialize)]
struct ListResponse {
    documents: Vec<ListItem>,
    next_cursor: Option<String>,
    has_more: bool,
}

#[derive(Deserialize)]
struct ListItem {
    id: String,
    updated_at: DateTime<Utc>,
}

impl CClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: http_client(),
            base_url,
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
impl UpstreamClient for CClient {
    async fn list_updated_since(
        &self,
        since: DateTime<Utc>,
        cursor: Option<String>,
    ) -> Result<Page, ClientError> {
        let url = format!("{}/documents", self.base_url);
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
                .documents
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
        let url = format!("{}/documents/{}", self.base_url, urlencoding::encode(external_id));
        let resp = self.send_with_retry(|| self.http.get(&url), true).await?;
        resp.json().await.map_err(|e| ClientError::Permanent(e.into()))
    }
}
