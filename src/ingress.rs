use std::sync::Arc;
use std::time::Instant;

use actix_web::web;
use actix_web::HttpResponse;
use actix_web::Responder;
use chrono::Utc;
use hmac::Hmac;
use hmac::Mac;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Serialize;
use sha2::Sha256;

use crate::domain::Envelope;
use crate::domain::EnvelopeKind;
use crate::domain::EnvelopeState;
use crate::domain::Source;
use crate::queue::Queue;
use crate::sink::Sink;

type HmacSha256 = Hmac<Sha256>;

/// C4: webhook ingress + health. Only a signature check and a single
/// `enqueue` happen on the request path — no upstream call, no sink write
/// (`spec.md` §4.4 step 5).
pub struct IngressState {
    pub queue: Arc<Queue>,
    pub sink: Arc<Sink>,
    pub started_at: Instant,
    pub t_webhook_secret: Option<Secret<String>>,
    pub m_webhook_secret: Option<Secret<String>>,
}

impl IngressState {
    fn secret_for(&self, source: Source) -> Option<&Secret<String>> {
        match source {
            Source::T => self.t_webhook_secret.as_ref(),
            Source::M => self.m_webhook_secret.as_ref(),
            Source::C => None,
        }
    }
}

const SIGNATURE_HEADER: &str = "x-signature";

/// Verifies `body` against `signature_hex` using `secret`. Constant-time
/// comparison is handled by `hmac`'s `verify_slice`.
fn verify_signature(secret: &Secret<String>, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) else { return false };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(serde::Deserialize)]
struct GenericWebhookBody {
    id: Option<String>,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    event: Option<String>,
}

fn external_id_and_kind(body: &[u8]) -> (String, EnvelopeKind) {
    match serde_json::from_slice::<GenericWebhookBody>(body) {
        Ok(parsed) => {
            let id = parsed
                .id
                .or(parsed.external_id)
                .unwrap_or_else(|| "unknown".to_string());
            let kind = match parsed.event.as_deref() {
                Some(e) if e.eq_ignore_ascii_case("deleted") => EnvelopeKind::Delete,
                Some(e) if e.eq_ignore_ascii_case("delete") => EnvelopeKind::Delete,
                Some(e) if e.eq_ignore_ascii_case("trashed") => EnvelopeKind::Delete,
                _ => EnvelopeKind::CreateOrUpdate,
            };
            (id, kind)
        }
        Err(_) => ("unknown".to_string(), EnvelopeKind::CreateOrUpdate),
    }
}

#[tracing::instrument(skip(state, body), fields(%source))]
pub async fn webhook(
    state: web::Data<IngressState>,
    path: web::Path<String>,
    body: web::Bytes,
    req: actix_web::HttpRequest,
) -> impl Responder {
    let source_raw = path.into_inner();
    let Ok(source) = source_raw.parse::<Source>() else {
        return HttpResponse::NotFound().finish();
    };

    if let Some(secret) = state.secret_for(source) {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        match signature {
            Some(sig) if verify_signature(secret, &body, sig) => {}
            _ => {
                tracing::warn!(%source, "rejecting webhook: signature mismatch");
                return HttpResponse::Unauthorized().finish();
            }
        }
    }

    let (external_id, kind) = external_id_and_kind(&body);
    let envelope = Envelope::from_webhook(source, &external_id, kind, body.to_vec());

    match state.queue.enqueue(&envelope).await {
        Ok(_) => HttpResponse::Ok().finish(),
        Err(e) => {
            tracing::error!(%source, error = %e, "failed to enqueue webhook");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[derive(Serialize)]
struct HealthBody {
    queue_depth: i64,
    db_ok: bool,
    uptime_seconds: u64,
    timestamp: chrono::DateTime<Utc>,
}

pub async fn health(state: web::Data<IngressState>) -> impl Responder {
    let depth_by_state = state.queue.depth_by_state().await.unwrap_or_default();
    let queue_depth: i64 = depth_by_state.iter().map(|(_, count)| count).sum();
    let db_ok = state.sink.ping().await;

    let body = HealthBody {
        queue_depth,
        db_ok,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    };

    let status = if db_ok { HttpResponse::Ok() } else { HttpResponse::ServiceUnavailable() };
    status.json(body)
}

/// Pending-state queue depth, split by state — used by the `status` CLI
/// subcommand as well as an optional detail on `/health`.
pub async fn depth_by_state(queue: &Queue) -> Vec<(EnvelopeState, i64)> {
    queue
        .depth_by_state()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(state, count)| {
            let parsed = match state.as_str() {
                "pending" => EnvelopeState::Pending,
                "leased" => EnvelopeState::Leased,
                "completed" => EnvelopeState::Completed,
                "failed" => EnvelopeState::Failed,
                _ => return None,
            };
            Some((parsed, count))
        })
        .collect()
}
