use once_cell::sync::Lazy;
use secrecy::ExposeSecret;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use syncguard::configuration::get_configuration;
use syncguard::startup::get_connection_pool;
use syncguard::startup::Application;
use syncguard::telemetry::get_subscriber;
use syncguard::telemetry::init_subscriber;

/// Init a static subscriber once for the whole test binary.
///
/// To opt in to verbose logging: `TEST_LOG=true cargo test | bunyan`.
static TRACING: Lazy<()> = Lazy::new(|| match std::env::var("TEST_LOG") {
    Ok(_) => init_subscriber(get_subscriber("test", "debug", std::io::stdout)),
    Err(_) => init_subscriber(get_subscriber("test", "debug", std::io::sink)),
});

pub struct TestApp {
    pub addr: String,
    pub pool: PgPool,
}

impl TestApp {
    pub async fn post_webhook(&self, source: &str, body: &str, signature: Option<&str>) -> reqwest::Response {
        let mut req = reqwest::Client::new()
            .post(format!("{}/webhook/{source}", self.addr))
            .header("Content-Type", "application/json")
            .body(body.to_string());
        if let Some(sig) = signature {
            req = req.header("x-signature", sig);
        }
        req.send().await.unwrap()
    }

    pub async fn get_health(&self) -> reqwest::Response {
        reqwest::Client::new().get(format!("{}/health", self.addr)).send().await.unwrap()
    }
}

/// Each test env var is set before reading configuration, mirroring the
/// pattern the teacher's `configure_database` uses to spin up an isolated
/// database per test — here done entirely through the environment, since
/// this service has no config file to layer a test profile onto.
async fn configure_database() -> PgPool {
    std::env::set_var("DATABASE__USERNAME", "postgres");
    std::env::set_var("DATABASE__PASSWORD", "password");
    std::env::set_var("DATABASE__HOST", "localhost");
    std::env::set_var("DATABASE__PORT", "5432");
    std::env::set_var("APP_PORT", "0");
    std::env::set_var("DISABLE_WEBHOOKS", "true");

    let db_name = uuid::Uuid::new_v4().to_string();
    std::env::set_var("DATABASE__DATABASE_NAME", &db_name);

    let cfg = get_configuration().expect("test environment must set all required config vars");

    let admin_dsn = format!(
        "postgres://{}:{}@{}:{}/postgres",
        cfg.database.username,
        cfg.database.password.expose_secret(),
        cfg.database.host,
        cfg.database.port,
    );
    let mut conn = PgConnection::connect_with(&admin_dsn.parse().unwrap())
        .await
        .expect("postgres must be running for integration tests");
    conn.execute(format!(r#"CREATE DATABASE "{db_name}";"#).as_str()).await.unwrap();

    let pool = get_connection_pool(&cfg.database);
    sqlx::migrate!("./migrations").run(&pool).await.expect("failed to migrate test database");

    pool
}

pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let pool = configure_database().await;
    let cfg = get_configuration().unwrap();
    let app = Application::build(cfg).await.unwrap();
    let addr = format!("http://localhost:{}", app.get_port());

    let (server, _pollers, _worker, _webhook_manager, _public_base_url) = app.into_parts();
    tokio::spawn(server);

    TestApp { addr, pool }
}
