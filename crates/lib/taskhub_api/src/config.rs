//! API server configuration.

use std::str::FromStr;
use std::time::Duration;

use taskhub_core::auth::jwt::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_SECS, resolve_access_secret,
    resolve_refresh_secret,
};
use taskhub_core::events::broker::DEFAULT_CLAIM_IDLE;
use taskhub_core::events::consumer::{DEFAULT_GROUP, default_consumer_name};
use tracing::warn;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3000").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis URL shared by the cache and the event broker.
    pub redis_url: String,
    /// Access token signing secret.
    pub jwt_secret: String,
    /// Refresh token signing secret; must differ from `jwt_secret`.
    pub jwt_refresh_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub store_timeout: Duration,
    pub broker_connect_timeout: Duration,
    pub broker_request_timeout: Duration,
    pub event_partitions: u32,
    pub broker_min_replicas: u32,
    pub consumer_group: String,
    /// Member name within `consumer_group`; keep it stable per instance.
    pub consumer_name: String,
    /// Idle time before another member's pending events are taken over.
    pub consumer_claim_idle: Duration,
    /// Requests allowed per client IP in each `rate_limit_window`.
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// Largest accepted request body.
    pub body_limit_bytes: usize,
    /// Deployment environment; `production` hides internal error detail.
    pub app_env: String,
    /// `source` stamped on every published event.
    pub event_source: String,
}

impl Default for ApiConfig {
    /// Documented defaults with empty secrets.
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".into(),
            database_url: "postgres://localhost:5432/taskhub".into(),
            redis_url: "redis://127.0.0.1:6379".into(),
            jwt_secret: String::new(),
            jwt_refresh_secret: String::new(),
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_secs: DEFAULT_REFRESH_TOKEN_TTL_SECS,
            cache_ttl: Duration::from_secs(60),
            cache_timeout: Duration::from_millis(500),
            store_timeout: Duration::from_millis(5000),
            broker_connect_timeout: Duration::from_millis(3000),
            broker_request_timeout: Duration::from_millis(30_000),
            event_partitions: 3,
            broker_min_replicas: 0,
            consumer_group: DEFAULT_GROUP.into(),
            consumer_name: default_consumer_name(),
            consumer_claim_idle: DEFAULT_CLAIM_IDLE,
            rate_limit_max: 100,
            rate_limit_window: Duration::from_secs(15 * 60),
            body_limit_bytes: 10 * 1024 * 1024,
            app_env: "development".into(),
            event_source: "taskhub-api".into(),
        }
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                    | Default                               |
    /// |-----------------------------|---------------------------------------|
    /// | `BIND_ADDR`                 | `127.0.0.1:3000`                      |
    /// | `DATABASE_URL`              | `postgres://localhost:5432/taskhub`   |
    /// | `REDIS_URL`                 | `redis://127.0.0.1:6379`              |
    /// | `JWT_SECRET` / `AUTH_SECRET`| generated & persisted to file         |
    /// | `JWT_REFRESH_SECRET`        | generated & persisted to file         |
    /// | `ACCESS_TOKEN_TTL_SECS`     | `900`                                 |
    /// | `REFRESH_TOKEN_TTL_SECS`    | `604800`                              |
    /// | `CACHE_TTL_SECS`            | `60`                                  |
    /// | `CACHE_TIMEOUT_MS`          | `500`                                 |
    /// | `STORE_TIMEOUT_MS`          | `5000`                                |
    /// | `BROKER_CONNECT_TIMEOUT_MS` | `3000`                                |
    /// | `BROKER_REQUEST_TIMEOUT_MS` | `30000`                               |
    /// | `EVENT_PARTITIONS`          | `3`                                   |
    /// | `BROKER_MIN_REPLICAS`       | `0`                                   |
    /// | `CONSUMER_GROUP`            | `taskhub-group`                       |
    /// | `CONSUMER_NAME`             | `taskhub-group-<hostname>`            |
    /// | `CONSUMER_CLAIM_IDLE_MS`    | `60000`                               |
    /// | `RATE_LIMIT_MAX`            | `100`                                 |
    /// | `RATE_LIMIT_WINDOW_MS`      | `900000`                              |
    /// | `BODY_LIMIT_BYTES`          | `10485760`                            |
    /// | `APP_ENV`                   | `development`                         |
    /// | `EVENT_SOURCE`              | `taskhub-api`                         |
    ///
    /// Unparseable numbers fall back to the default with a warning.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bind_addr: env_or("BIND_ADDR", d.bind_addr),
            database_url: env_or("DATABASE_URL", d.database_url),
            redis_url: env_or("REDIS_URL", d.redis_url),
            jwt_secret: resolve_access_secret(),
            jwt_refresh_secret: resolve_refresh_secret(),
            access_token_ttl_secs: env_parse("ACCESS_TOKEN_TTL_SECS", d.access_token_ttl_secs),
            refresh_token_ttl_secs: env_parse("REFRESH_TOKEN_TTL_SECS", d.refresh_token_ttl_secs),
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", d.cache_ttl.as_secs())),
            cache_timeout: env_millis("CACHE_TIMEOUT_MS", d.cache_timeout),
            store_timeout: env_millis("STORE_TIMEOUT_MS", d.store_timeout),
            broker_connect_timeout: env_millis("BROKER_CONNECT_TIMEOUT_MS", d.broker_connect_timeout),
            broker_request_timeout: env_millis("BROKER_REQUEST_TIMEOUT_MS", d.broker_request_timeout),
            event_partitions: env_parse("EVENT_PARTITIONS", d.event_partitions),
            broker_min_replicas: env_parse("BROKER_MIN_REPLICAS", d.broker_min_replicas),
            consumer_group: env_or("CONSUMER_GROUP", d.consumer_group),
            consumer_name: env_or("CONSUMER_NAME", d.consumer_name),
            consumer_claim_idle: env_millis("CONSUMER_CLAIM_IDLE_MS", d.consumer_claim_idle),
            rate_limit_max: env_parse("RATE_LIMIT_MAX", d.rate_limit_max),
            rate_limit_window: env_millis("RATE_LIMIT_WINDOW_MS", d.rate_limit_window),
            body_limit_bytes: env_parse("BODY_LIMIT_BYTES", d.body_limit_bytes),
            app_env: env_or("APP_ENV", d.app_env),
            event_source: env_or("EVENT_SOURCE", d.event_source),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Whether error responses carry the internal `detail` field.
    pub fn expose_error_detail(&self) -> bool {
        !self.is_production()
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, default = %default, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(name, default.as_millis() as u64))
}
