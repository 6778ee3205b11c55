use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::App;
use actix_web::HttpServer;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::checkpoint::CheckpointStore;
use crate::clients::c::CClient;
use crate::clients::m::MClient;
use crate::clients::t::TClient;
use crate::clients::UpstreamClient;
use crate::configuration::DatabaseSettings;
use crate::configuration::Settings;
use crate::domain::Source;
use crate::handlers::c::DocHandler;
use crate::handlers::m::MessageHandler;
use crate::handlers::t::TaskHandler;
use crate::handlers::EventHandler;
use crate::identity::ensure_state_dir;
use crate::identity::IdentityCache;
use crate::ingress;
use crate::ingress::IngressState;
use crate::poller::Poller;
use crate::poller::PollerConfig;
use crate::process_after::parse_process_after;
use crate::queue::Queue;
use crate::sink::Sink;
use crate::webhooks::WebhookManager;
use crate::worker::Worker;
use crate::worker::WorkerConfig;

pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(
        db_cfg
            .connection_string()
            .expose_secret()
            .parse()
            .expect("DB_DSN must be a valid postgres connection string"),
    )
}

/// Everything the combined service spawns: the actix-web ingress server plus
/// one poller and one dispatcher task per configured source, raced in
/// `main` the way the teacher races its server/delivery/expiry tasks.
pub struct Application {
    port: u16,
    server: Server,
    pub pollers: Vec<Arc<Poller>>,
    pub worker: Arc<Worker>,
    pub webhook_manager: Option<Arc<WebhookManager>>,
    pub public_base_url: Option<String>,
}

impl Application {
    pub async fn build(cfg: Settings) -> Result<Self, anyhow::Error> {
        let addr = format!("0.0.0.0:{}", cfg.app_port);
        let listener = TcpListener::bind(addr)?;
        let port = listener.local_addr()?.port();

        let pool = get_connection_pool(&cfg.database);
        sqlx::migrate!().run(&pool).await?;

        ensure_state_dir(std::path::Path::new(&cfg.state_dir))?;

        let queue = Arc::new(Queue::new(pool.clone()));
        let checkpoints = Arc::new(CheckpointStore::new(pool.clone()));
        let sink = Arc::new(Sink::new(pool.clone()));
        let identity = Arc::new(IdentityCache::new(
            Duration::from_secs(60),
            Some(std::path::PathBuf::from(&cfg.state_dir).join("identity.json")),
        ));

        let mut handlers: HashMap<Source, Arc<dyn EventHandler>> = HashMap::new();
        let mut process_after: HashMap<Source, Option<chrono::DateTime<chrono::Utc>>> = HashMap::new();
        let mut pollers = Vec::new();
        let mut t_registrar: Option<Arc<TClient>> = None;
        let mut m_registrar: Option<Arc<MClient>> = None;

        if let Some(t) = &cfg.t {
            let t_process_after = t.process_after.as_deref().map(parse_process_after).transpose()?;
            let concrete = Arc::new(TClient::new(t.base_url.clone(), t.api_key.clone()));
            let client: Arc<dyn UpstreamClient> = concrete.clone();
            t_registrar = Some(concrete);
            handlers.insert(Source::T, Arc::new(TaskHandler::new(client.clone())));
            process_after.insert(Source::T, t_process_after);
            pollers.push(Arc::new(Poller::new(
                client,
                queue.clone(),
                checkpoints.clone(),
                PollerConfig {
                    source: Source::T,
                    overlap: chrono::Duration::seconds(cfg.backfill_overlap_seconds),
                    default_seed: t_process_after.unwrap_or_else(|| chrono::Utc::now() - chrono::Duration::days(365)),
                    process_after: t_process_after,
                    cycle_page_cap: 100,
                },
            )));
        }

        if let Some(m) = &cfg.m {
            let m_process_after = m.process_after.as_deref().map(parse_process_after).transpose()?;
            let concrete = Arc::new(MClient::new(m.api_token.clone()));
            let client: Arc<dyn UpstreamClient> = concrete.clone();
            m_registrar = Some(concrete);
            handlers.insert(Source::M, Arc::new(MessageHandler::new(client.clone())));
            process_after.insert(Source::M, m_process_after);
            pollers.push(Arc::new(Poller::new(
                client,
                queue.clone(),
                checkpoints.clone(),
                PollerConfig {
                    source: Source::M,
                    overlap: chrono::Duration::seconds(cfg.backfill_overlap_seconds),
                    default_seed: m_process_after.unwrap_or_else(|| chrono::Utc::now() - chrono::Duration::days(30)),
                    process_after: m_process_after,
                    cycle_page_cap: 100,
                },
            )));
        }

        if let Some(c) = &cfg.c {
            let client: Arc<dyn UpstreamClient> = Arc::new(CClient::new(c.base_url.clone()));
            handlers.insert(Source::C, Arc::new(DocHandler::new(client.clone())));
            process_after.insert(Source::C, None);
            pollers.push(Arc::new(Poller::new(
                client,
                queue.clone(),
                checkpoints.clone(),
                PollerConfig {
                    source: Source::C,
                    overlap: chrono::Duration::seconds(cfg.backfill_overlap_seconds),
                    default_seed: chrono::Utc::now() - chrono::Duration::days(365),
                    process_after: None,
                    cycle_page_cap: 100,
                },
            )));
        }

        let worker = Arc::new(Worker::new(
            queue.clone(),
            sink.clone(),
            identity.clone(),
            handlers,
            process_after,
            WorkerConfig {
                batch_size: 10,
                lease_duration: Duration::from_secs(5 * 60),
                max_attempts: cfg.max_queue_attempts,
                retry_delay: Duration::from_secs(cfg.spool_retry_seconds as u64),
            },
        ));

        let webhook_manager = if cfg.disable_webhooks {
            None
        } else {
            let t_registrar: Option<Arc<dyn crate::webhooks::WebhookRegistrar>> =
                t_registrar.map(|c| c as Arc<dyn crate::webhooks::WebhookRegistrar>);
            let m_registrar: Option<Arc<dyn crate::webhooks::WebhookRegistrar>> =
                m_registrar.map(|c| c as Arc<dyn crate::webhooks::WebhookRegistrar>);
            Some(Arc::new(WebhookManager::new(pool.clone(), t_registrar, m_registrar)))
        };

        let ingress_state = web::Data::new(IngressState {
            queue: queue.clone(),
            sink: sink.clone(),
            started_at: Instant::now(),
            t_webhook_secret: cfg.t.as_ref().and_then(|t| t.webhook_secret.clone()),
            m_webhook_secret: cfg.m.as_ref().and_then(|m| m.webhook_secret.clone()),
        });

        let server = HttpServer::new(move || {
            App::new()
                .wrap(TracingLogger::default())
                .app_data(ingress_state.clone())
                .route("/webhook/{source}", web::post().to(ingress::webhook))
                .route("/health", web::get().to(ingress::health))
        })
        .listen(listener)?
        .run();

        Ok(Self {
            port,
            server,
            pollers,
            worker,
            webhook_manager,
            public_base_url: cfg.public_base_url.clone(),
        })
    }

    pub fn get_port(&self) -> u16 { self.port }

    /// Splits off the background-task handles so the caller can race the
    /// server against them without fighting the borrow checker over `self`.
    pub fn into_parts(self) -> (Server, Vec<Arc<Poller>>, Arc<Worker>, Option<Arc<WebhookManager>>, Option<String>) {
        (self.server, self.pollers, self.worker, self.webhook_manager, self.public_base_url)
    }
}
