//! Ingestion daemon settings, configurable using environment variables.
use camino::Utf8PathBuf;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    pub inbox_path: Utf8PathBuf,
    pub processed_path: Utf8PathBuf,
    pub failed_path: Utf8PathBuf,

    pub orthanc_url: String,

    pub keycloak_url: String,
    pub keycloak_realm: String,
    pub keycloak_client_id: String,
    #[serde(default)]
    pub keycloak_client_secret: String,

    #[serde(with = "humantime_serde", default = "default_cooldown")]
    pub cooldown_seconds: Duration,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: NonZeroUsize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_max_concurrent() -> NonZeroUsize {
    NonZeroUsize::new(3).unwrap()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_port() -> u16 {
    8080
}
