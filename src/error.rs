/// Error taxonomy from `spec.md` §7. Upstream clients (C3) classify failures
/// into these variants; handlers (C6) and the dispatcher (C8) use the
/// classification to decide retry vs. fail-permanent — they never swallow or
/// reclassify an error further up the stack.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// 429, 5xx, or network timeout. Already retried with backoff inside the
    /// client; surfaced only once retries are exhausted.
    #[error("transient upstream error: {0}")]
    Transient(#[source] anyhow::Error),

    /// 4xx other than 429, or a malformed response body.
    #[error("permanent upstream error: {0}")]
    Permanent(#[source] anyhow::Error),

    /// 404 on a previously-known entity — treated as a deletion, not a
    /// failure, by the caller.
    #[error("entity gone: {0}")]
    Gone(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool { matches!(self, ClientError::Transient(_)) }
    pub fn is_gone(&self) -> bool { matches!(self, ClientError::Gone(_)) }
}

/// What the dispatcher (C8) does with an envelope after a handler/sink call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Re-lease after `SPOOL_RETRY_SECONDS`, subject to `MAX_QUEUE_ATTEMPTS`.
    Retryable,
    /// Move directly to `failed`, skipping the attempts budget.
    Permanent,
}

impl From<&ClientError> for RetryPolicy {
    fn from(e: &ClientError) -> Self {
        match e {
            ClientError::Transient(_) => RetryPolicy::Retryable,
            ClientError::Permanent(_) => RetryPolicy::Permanent,
            // a `Gone` should have already been converted into a deletion
            // record by the handler; if it propagates this far treat it like
            // any other permanent upstream rejection.
            ClientError::Gone(_) => RetryPolicy::Permanent,
        }
    }
}
