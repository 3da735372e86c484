use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub reservation: ReservationSettings,
}

/// Seat hold and sweep tuning.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReservationSettings {
    #[serde(default = "default_hold_seconds")]
    pub hold_seconds: u64,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub reconcile_batch_size: usize,
    #[serde(default = "default_deadline")]
    pub store_deadline_seconds: u64,
}

fn default_hold_seconds() -> u64 { 600 }
fn default_reconcile_interval() -> u64 { 30 }
fn default_batch_size() -> usize { 500 }
fn default_deadline() -> u64 { 10 }

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            hold_seconds: default_hold_seconds(),
            reconcile_interval_seconds: default_reconcile_interval(),
            reconcile_batch_size: default_batch_size(),
            store_deadline_seconds: default_deadline(),
        }
    }
}

impl ReservationSettings {
    pub fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds.max(1))
    }

    pub fn store_deadline(&self) -> Duration {
        Duration::from_secs(self.store_deadline_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config")
    }

    /// Layers `<dir>/default`, `<dir>/<RUN_MODE>`, `<dir>/local` and
    /// `FLASHTIX__*` environment variables, later sources winning.
    pub fn load_from(dir: &str) -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name(&format!("{}/default", dir)))
            .add_source(config::File::with_name(&format!("{}/{}", dir, run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name(&format!("{}/local", dir)).required(false))
            // e.g. FLASHTIX__RESERVATION__HOLD_SECONDS=300
            .add_source(config::Environment::with_prefix("FLASHTIX").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
