use std::future::Future;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::ClientError;

/// `spec.md` §5 "per-request timeout (default 30s)".
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `spec.md` §5 "total-call timeout (default 5 min)", covering a whole
/// retry loop rather than any single request.
pub const TOTAL_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Builds the `reqwest::Client` every upstream client shares, with the
/// per-request timeout wired in so a hung upstream surfaces as a
/// `Transient` error instead of holding a lease open forever.
pub fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("static client configuration is always valid")
}

/// Bounds an upstream call's total wall-clock time across every retry
/// attempt (`spec.md` §5). A blown budget is classified transient so it
/// feeds the same queue-attempts accounting as any other retryable failure.
pub async fn with_total_timeout<T>(
    fut: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    match tokio::time::timeout(TOTAL_CALL_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Transient(anyhow::anyhow!(
            "upstream call exceeded total timeout of {TOTAL_CALL_TIMEOUT:?}"
        ))),
    }
}

/// Base/cap/max-retries per `spec.md` §4.3: "base 1s, cap 60s, jitter...
/// Max retries per call: 5."
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

/// Full jitter exponential backoff: `rand(0, min(cap, base * 2^attempt))`.
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self { Self { policy, attempt: 0 } }

    pub fn reset(&mut self) { self.attempt = 0; }

    pub fn next_delay(&mut self) -> Duration {
        let exp = self.policy.base.saturating_mul(1 << self.attempt.min(10));
        let capped = exp.min(self.policy.cap);
        self.attempt += 1;
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64);
        Duration::from_millis(jitter_ms)
    }

    pub fn exhausted(&self) -> bool { self.attempt >= self.policy.max_retries }
}

/// Parses `Retry-After` as delta-seconds (the only form in common use by the
/// kind of internal SaaS APIs this core talks to; HTTP-date would need an
/// extra dependency for a case we haven't observed).
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Classifies a completed HTTP response per `spec.md` §4.3/§7.
pub fn classify_status(status: StatusCode, known_entity: bool) -> Option<ClientError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::NOT_FOUND && known_entity {
        return Some(ClientError::Gone(status.to_string()));
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Some(ClientError::Transient(anyhow::anyhow!(
            "upstream returned {status}"
        )));
    }
    Some(ClientError::Permanent(anyhow::anyhow!(
        "upstream returned {status}"
    )))
}

/// Simple token bucket enforcing `spec.md` §4.3 "global per-client request
/// rate ceiling". One instance per client, shared across concurrent calls.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec,
        }
    }

    /// Block until one token is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let shortfall = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(shortfall / self.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(d) => sleep(d).await,
            }
        }
    }
}
