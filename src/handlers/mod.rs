pub mod c;
pub mod m;
pub mod t;

use chrono::DateTime;
use chrono::Utc;

use crate::domain::CanonicalRecord;
use crate::domain::Envelope;
use crate::error::ClientError;
use crate::identity::IdentityCache;

/// C6: one handler per source. `envelope -> Vec<CanonicalRecord>`, routed by
/// the dispatcher (C8). A handler never swallows a `ClientError` — it either
/// converts a `Gone` into a deletion record or propagates the error upward
/// for C8 to classify.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: &Envelope,
        identity: &IdentityCache,
        process_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<CanonicalRecord>, ClientError>;
}

/// Shared step 3/step 4 helper: strip a blank string to `None` (`spec.md`
/// §4.6 step 3 "strip null fields").
pub(crate) fn non_blank(s: Option<String>) -> Option<String> {
    s.and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
}

/// Coerce a free-form address into canonical `user@host` form (lowercased,
/// trimmed). Best-effort: addresses that don't contain `@` are returned
/// trimmed and lowercased as-is rather than rejected, since the upstream
/// may hand us a display name without one.
pub(crate) fn canonical_address(raw: &str) -> String { raw.trim().to_ascii_lowercase() }
