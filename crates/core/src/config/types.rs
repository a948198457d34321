use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub numbering: NumberingConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long a connection waits for another writer's lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("queuedesk.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Dispatch engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Deadline applied to every store call made by the queue services.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_store_timeout_ms() -> u64 {
    5000
}

/// Sequence allocation retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NumberingConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `n * retry_backoff_ms`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    25
}

/// Wait estimation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimatorConfig {
    /// Per-ticket service time assumed when there is no history.
    #[serde(default = "default_fallback_service_minutes")]
    pub fallback_service_minutes: u32,
    /// Rolling window of completed tickets feeding the average.
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            fallback_service_minutes: default_fallback_service_minutes(),
            history_days: default_history_days(),
        }
    }
}

fn default_fallback_service_minutes() -> u32 {
    5
}

fn default_history_days() -> u32 {
    7
}

/// Event hub configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    /// Events buffered per subscriber before it is dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_subscriber_buffer() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "queuedesk.db");
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.dispatch.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.numbering.max_attempts, 3);
        assert_eq!(config.numbering.retry_backoff_ms, 25);
        assert_eq!(config.estimator.fallback_service_minutes, 5);
        assert_eq!(config.estimator.history_days, 7);
        assert_eq!(config.hub.subscriber_buffer, 64);
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[numbering]
max_attempts = 5

[hub]
subscriber_buffer = 8
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.numbering.max_attempts, 5);
        assert_eq!(config.numbering.retry_backoff_ms, 25);
        assert_eq!(config.hub.subscriber_buffer, 8);
    }

    #[test]
    fn test_deserialize_with_custom_database_path() {
        let toml = r#"
[database]
path = "/data/queue.sqlite"
busy_timeout_ms = 250
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "/data/queue.sqlite");
        assert_eq!(config.database.busy_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_deserialize_wrong_type_fails() {
        let toml = r#"
[server]
port = "eighty"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
