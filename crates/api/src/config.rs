//! Daemon configuration loaded from environment variables.

use std::time::Duration;

use saga::SagaConfig;
use scheduler::SchedulerConfig;

/// Runtime configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory stores when unset
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `SCHEDULER_POLL_INTERVAL_MS`: how often unclaimed operations are polled (default: `1000`)
/// - `SAGA_EXPIRATION_SECS`: saga lifetime (default: `3600`)
/// - `COMMAND_TOPIC` / `EVENT_TOPIC`: topic names (default: `"saga.commands"` / `"saga.events"`)
/// - `INBOX_QUEUE`: queue the dispatcher consumes (default: `"saga.inbox"`)
/// - `SAGA_CONFLICT_RETRIES`: listener re-runs after a conflicting save (default: `3`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub scheduler_poll_interval: Duration,
    pub saga_expiration: chrono::Duration,
    pub command_topic: String,
    pub event_topic: String,
    pub inbox_queue: String,
    pub saga_conflict_retries: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparsable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            scheduler_poll_interval: parsed("SCHEDULER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.scheduler_poll_interval),
            saga_expiration: lookup("SAGA_EXPIRATION_SECS")
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(defaults.saga_expiration),
            command_topic: lookup("COMMAND_TOPIC").unwrap_or(defaults.command_topic),
            event_topic: lookup("EVENT_TOPIC").unwrap_or(defaults.event_topic),
            inbox_queue: lookup("INBOX_QUEUE").unwrap_or(defaults.inbox_queue),
            saga_conflict_retries: lookup("SAGA_CONFLICT_RETRIES")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.saga_conflict_retries),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            command_topic: self.command_topic.clone(),
            poll_interval: self.scheduler_poll_interval,
        }
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            expiration: self.saga_expiration,
            command_topic: self.command_topic.clone(),
            event_topic: self.event_topic.clone(),
            conflict_retries: self.saga_conflict_retries,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 5,
            scheduler_poll_interval: SchedulerConfig::default().poll_interval,
            saga_expiration: saga.expiration,
            command_topic: saga.command_topic,
            event_topic: saga.event_topic,
            inbox_queue: "saga.inbox".to_string(),
            saga_conflict_retries: saga.conflict_retries,
        }
    }
}
