pub mod c;
pub mod m;
pub mod retry;
pub mod t;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;

use crate::error::ClientError;

/// One page of `list_updated_since` results (`spec.md` §4.3).
pub struct Page {
    pub items: Vec<PageItem>,
    pub next_cursor: Option<String>,
    pub exhausted: bool,
}

/// A minimal per-item descriptor; handlers re-fetch the full object via
/// `get` unless the webhook payload already carried a full snapshot.
pub struct PageItem {
    pub external_id: String,
    pub updated_at: DateTime<Utc>,
}

/// C3: shared contract for the T/M/C upstream clients. Pagination, auth, and
/// 429/5xx backoff are each client's own concern (see `clients::retry`); this
/// trait is only the shape the poller (C5) and handlers (C6) depend on.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch one page of entities updated at or after `since`, resuming from
    /// `cursor` if the source is cursor-paged.
    async fn list_updated_since(
        &self,
        since: DateTime<Utc>,
        cursor: Option<String>,
    ) -> Result<Page, ClientError>;

    /// Fetch the full object for `external_id`. A `ClientError::Gone` means
    /// the entity has been deleted/trashed upstream.
    async fn get(&self, external_id: &str) -> Result<Value, ClientError>;
}
