use std::sync::Arc;

use sqlx::PgPool;

use crate::domain::Source;

/// C9: webhook lifecycle manager. Runs once at startup and again whenever the
/// public base URL changes. Webhook liveness is not a hard prerequisite —
/// C5 alone keeps the system converged, so every step here logs and
/// continues rather than aborting startup (`spec.md` §4.9 step 5).
pub struct WebhookManager {
    pool: PgPool,
    t_registrar: Option<Arc<dyn WebhookRegistrar>>,
    m_registrar: Option<Arc<dyn WebhookRegistrar>>,
}

/// Per-source registration surface. `clients::t`/`clients::m` implement it
/// alongside `UpstreamClient`; kept as a trait so the manager's reconcile
/// algorithm doesn't need to know source-specific wire detail.
#[async_trait::async_trait]
pub trait WebhookRegistrar: Send + Sync {
    async fn delete_registration(&self, registration_id: &str) -> Result<(), anyhow::Error>;
    async fn create_registrations(&self, target_url: &str) -> Result<Vec<RegisteredEvent>, anyhow::Error>;
}

pub struct RegisteredEvent {
    pub registration_id: String,
    pub event: String,
}

impl WebhookManager {
    pub fn new(
        pool: PgPool,
        t_registrar: Option<Arc<dyn WebhookRegistrar>>,
        m_registrar: Option<Arc<dyn WebhookRegistrar>>,
    ) -> Self {
        Self { pool, t_registrar, m_registrar }
    }

    /// Reconciles registrations for every configured source against
    /// `target_url` (`spec.md` §4.9 steps 1–4).
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, target_url: &str) {
        if let Some(registrar) = &self.t_registrar {
            self.reconcile_source(Source::T, registrar.as_ref(), target_url).await;
        }
        if let Some(registrar) = &self.m_registrar {
            self.reconcile_source(Source::M, registrar.as_ref(), target_url).await;
        }
    }

    async fn reconcile_source(&self, source: Source, registrar: &dyn WebhookRegistrar, target_url: &str) {
        if let Err(e) = self.delete_stale(source, registrar).await {
            tracing::warn!(%source, error = %e, "failed to delete stale webhook registrations, continuing");
        }

        match registrar.create_registrations(target_url).await {
            Ok(events) => {
                if let Err(e) = self.persist(source, target_url, &events).await {
                    tracing::error!(%source, error = %e, "failed to persist new webhook registrations");
                }
            }
            Err(e) => {
                tracing::error!(
                    %source,
                    error = %e,
                    "webhook registration failed permanently; manual setup required against {target_url}"
                );
            }
        }
    }

    async fn delete_stale(&self, source: Source, registrar: &dyn WebhookRegistrar) -> Result<(), anyhow::Error> {
        let rows = sqlx::query!(
            r#"SELECT registration_id FROM webhook_registrations WHERE source = $1"#,
            source.to_string(),
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            // ignore 404s — a registration that's already gone is success
            let _ = registrar.delete_registration(&row.registration_id).await;
        }

        sqlx::query!(r#"DELETE FROM webhook_registrations WHERE source = $1"#, source.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn persist(
        &self,
        source: Source,
        target_url: &str,
        events: &[RegisteredEvent],
    ) -> Result<(), anyhow::Error> {
        for event in events {
            sqlx::query!(
                r#"
                INSERT INTO webhook_registrations (source, registration_id, target_url, events)
                VALUES ($1, $2, $3, $4)
                "#,
                source.to_string(),
                event.registration_id,
                target_url,
                &[event.event.clone()],
            )
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Whether the recorded registrations were last made against a different
    /// URL than `current` — the trigger condition for a re-reconcile beyond
    /// the one at startup.
    pub async fn needs_reconcile(&self, source: Source, current: &str) -> Result<bool, anyhow::Error> {
        let row = sqlx::query!(
            r#"SELECT target_url FROM webhook_registrations WHERE source = $1 LIMIT 1"#,
            source.to_string(),
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => r.target_url != current,
            None => true,
        })
    }
}
