use config::Config;
use config::ConfigError;
use config::Environment;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

/// Top-level process configuration. Every field here corresponds to a row in
/// `spec.md` §6's configuration table. Loaded once at startup; nothing in the
/// core re-reads the environment afterwards.
#[derive(Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,

    pub t: Option<TSettings>,
    pub m: Option<MSettings>,
    pub c: Option<CSettings>,

    #[serde(deserialize_with = "deserialize_number_from_string", default = "default_app_port")]
    pub app_port: u16,

    #[serde(default)]
    pub disable_webhooks: bool,

    #[serde(
        deserialize_with = "deserialize_number_from_string",
        default = "default_backfill_interval"
    )]
    pub periodic_backfill_interval_seconds: u64,

    #[serde(
        deserialize_with = "deserialize_number_from_string",
        default = "default_overlap"
    )]
    pub backfill_overlap_seconds: i64,

    #[serde(deserialize_with = "deserialize_number_from_string", default = "default_max_attempts")]
    pub max_queue_attempts: i32,

    #[serde(deserialize_with = "deserialize_number_from_string", default = "default_spool_retry")]
    pub spool_retry_seconds: i64,

    /// Public URL this process is reachable at, used by the webhook lifecycle
    /// manager to decide whether upstream registrations are stale.
    pub public_base_url: Option<String>,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path to the on-disk identity cache / webhook registration snapshot.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,

    #[serde(default)]
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> Secret<String> {
        use secrecy::ExposeSecret;
        Secret::new(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database_name,
        ))
    }
}

#[derive(Deserialize, Clone)]
pub struct TSettings {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub webhook_secret: Option<Secret<String>>,
    /// `DD.MM.YYYY`; entities created before this are handled but not stored.
    pub process_after: Option<String>,
    #[serde(default)]
    pub include_completed_tasks_on_initial_sync: bool,
}

#[derive(Deserialize, Clone)]
pub struct MSettings {
    pub api_token: Secret<String>,
    pub webhook_secret: Option<Secret<String>>,
    pub process_after: Option<String>,
}

#[derive(Deserialize, Clone)]
pub struct CSettings {
    pub base_url: String,
}

fn default_app_port() -> u16 { 5000 }
fn default_backfill_interval() -> u64 { 60 }
fn default_overlap() -> i64 { 120 }
fn default_max_attempts() -> i32 { 3 }
fn default_spool_retry() -> i64 { 60 }
fn default_timezone() -> String { "UTC".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_state_dir() -> String { "./state".to_string() }

/// Loads configuration exclusively from the process environment (this is a
/// headless service meant to run in a container, so unlike the teacher's
/// `configuration.yaml` there is no bundled file to fall back to — see
/// DESIGN.md). All options recognized are listed in `spec.md` §6.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = Config::builder()
        .add_source(
            Environment::default()
                .try_parsing(true)
                .separator("__")
                .prefix_separator("_"),
        )
        .build()?;
    settings.try_deserialize()
}
