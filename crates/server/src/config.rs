//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ORDERS_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `ORDERS_HOST` - Bind address (default: 127.0.0.1)
//! - `ORDERS_PORT` - Listen port (default: 8081)
//! - `ORDERS_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 5)
//! - `ORDERS_STATIC_DIR` - Directory served for unmatched paths (default: crates/server/static)
//! - `ORDERS_CACHE_WARM_TIMEOUT_SECS` - Startup cache warm deadline (default: 30)
//! - `KAFKA_BROKERS` - Bootstrap servers (default: localhost:9092)
//! - `KAFKA_INBOUND_TOPIC` - Topic the ingest loop consumes (default: orders)
//! - `KAFKA_OUTBOUND_TOPIC` - Topic API-created orders are published to (default: orders.created)
//! - `KAFKA_GROUP_ID` - Consumer group (default: orderline)
//! - `KAFKA_DEAD_LETTER_TOPIC` - Topic for undecodable messages (default: unset, disabled)
//! - `KAFKA_PUBLISH_TIMEOUT_MS` - Delivery timeout per publish (default: 5000)
//! - `INGEST_RETRY_BACKOFF_MS` - Pause after a failed fetch (default: 1000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Order server configuration.
///
/// `Debug` is derived; the database URL is a `SecretString` and prints redacted.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Upper bound on a single HTTP request
    pub request_timeout: Duration,
    /// Static files served as the router fallback
    pub static_dir: PathBuf,
    /// Deadline for the startup cache warm
    pub cache_warm_timeout: Duration,
    /// Kafka settings
    pub kafka: KafkaConfig,
    /// Pause after a failed fetch in the ingest loop
    pub ingest_retry_backoff: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Kafka connection and topic configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub brokers: String,
    pub inbound_topic: String,
    pub outbound_topic: String,
    pub group_id: String,
    pub dead_letter_topic: Option<String>,
    pub publish_timeout: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the database URL is missing or a value does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = get_database_url(env, "ORDERS_DATABASE_URL")?;
        let host = parse_env_or_default::<IpAddr>(env, "ORDERS_HOST", "127.0.0.1")?;
        let port = parse_env_or_default::<u16>(env, "ORDERS_PORT", "8081")?;
        let request_timeout = Duration::from_secs(parse_env_or_default(
            env,
            "ORDERS_REQUEST_TIMEOUT_SECS",
            "5",
        )?);
        let static_dir = PathBuf::from(get_env_or_default(
            env,
            "ORDERS_STATIC_DIR",
            "crates/server/static",
        ));
        let cache_warm_timeout = Duration::from_secs(parse_env_or_default(
            env,
            "ORDERS_CACHE_WARM_TIMEOUT_SECS",
            "30",
        )?);
        let kafka = KafkaConfig::from_lookup(env)?;
        let ingest_retry_backoff = Duration::from_millis(parse_env_or_default(
            env,
            "INGEST_RETRY_BACKOFF_MS",
            "1000",
        )?);

        Ok(Self {
            database_url,
            host,
            port,
            request_timeout,
            static_dir,
            cache_warm_timeout,
            kafka,
            ingest_retry_backoff,
            sentry_dsn: get_optional_env(env, "SENTRY_DSN"),
            sentry_environment: get_optional_env(env, "SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl KafkaConfig {
    /// Load only the Kafka settings from the process environment.
    ///
    /// Used by tools that publish without touching the database.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the publish timeout does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            brokers: get_env_or_default(env, "KAFKA_BROKERS", "localhost:9092"),
            inbound_topic: get_env_or_default(env, "KAFKA_INBOUND_TOPIC", "orders"),
            outbound_topic: get_env_or_default(env, "KAFKA_OUTBOUND_TOPIC", "orders.created"),
            group_id: get_env_or_default(env, "KAFKA_GROUP_ID", "orderline"),
            dead_letter_topic: get_optional_env(env, "KAFKA_DEAD_LETTER_TOPIC"),
            publish_timeout: Duration::from_millis(parse_env_or_default(
                env,
                "KAFKA_PUBLISH_TIMEOUT_MS",
                "5000",
            )?),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(
    env: &dyn Fn(&str) -> Option<String>,
    primary_key: &str,
) -> Result<SecretString, ConfigError> {
    env(primary_key)
        .or_else(|| env("DATABASE_URL"))
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key).filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(env: &dyn Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env_or_default<T>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(env, key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(&|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("ORDERS_DATABASE_URL", "postgres://localhost/orders")]).unwrap();

        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8081");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_warm_timeout, Duration::from_secs(30));
        assert_eq!(config.ingest_retry_backoff, Duration::from_millis(1000));
        assert_eq!(config.static_dir, PathBuf::from("crates/server/static"));
        assert_eq!(
            config.kafka,
            KafkaConfig {
                brokers: "localhost:9092".to_string(),
                inbound_topic: "orders".to_string(),
                outbound_topic: "orders.created".to_string(),
                group_id: "orderline".to_string(),
                dead_letter_topic: None,
                publish_timeout: Duration::from_millis(5000),
            }
        );
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_database_url_fallback() {
        let config = load(&[("DATABASE_URL", "postgres://fallback/db")]).unwrap();
        assert_eq!(config.database_url.expose_secret(), "postgres://fallback/db");

        let config = load(&[
            ("ORDERS_DATABASE_URL", "postgres://primary/db"),
            ("DATABASE_URL", "postgres://fallback/db"),
        ])
        .unwrap();
        assert_eq!(config.database_url.expose_secret(), "postgres://primary/db");
    }

    #[test]
    fn test_missing_database_url() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "ORDERS_DATABASE_URL"));
    }

    #[test]
    fn test_invalid_port() {
        let err = load(&[
            ("ORDERS_DATABASE_URL", "postgres://localhost/orders"),
            ("ORDERS_PORT", "not-a-port"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref k, _) if k == "ORDERS_PORT"));
    }

    #[test]
    fn test_invalid_backoff() {
        let err = load(&[
            ("ORDERS_DATABASE_URL", "postgres://localhost/orders"),
            ("INGEST_RETRY_BACKOFF_MS", "-1"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref k, _) if k == "INGEST_RETRY_BACKOFF_MS"));
    }

    #[test]
    fn test_overrides_and_dead_letter() {
        let config = load(&[
            ("ORDERS_DATABASE_URL", "postgres://localhost/orders"),
            ("ORDERS_HOST", "0.0.0.0"),
            ("ORDERS_PORT", "9000"),
            ("KAFKA_BROKERS", "kafka-1:9092,kafka-2:9092"),
            ("KAFKA_DEAD_LETTER_TOPIC", "orders.dlq"),
            ("KAFKA_PUBLISH_TIMEOUT_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:9000");
        assert_eq!(config.kafka.brokers, "kafka-1:9092,kafka-2:9092");
        assert_eq!(config.kafka.dead_letter_topic.as_deref(), Some("orders.dlq"));
        assert_eq!(config.kafka.publish_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_empty_dead_letter_topic_is_disabled() {
        let config = load(&[
            ("ORDERS_DATABASE_URL", "postgres://localhost/orders"),
            ("KAFKA_DEAD_LETTER_TOPIC", "  "),
        ])
        .unwrap();
        assert!(config.kafka.dead_letter_topic.is_none());
    }

    #[test]
    fn test_debug_redacts_database_url() {
        let config = load(&[("ORDERS_DATABASE_URL", "postgres://user:hunter2@db/orders")]).unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("hunter2"));
    }
}
