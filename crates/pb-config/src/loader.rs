//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "postbox.toml",
    "./config/config.toml",
    "/etc/postbox/config.toml",
];

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found), apply environment overrides, validate.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        } else {
            info!("No configuration file found, using defaults");
        }

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("POSTBOX_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

fn parse_into<T: FromStr>(key: &str, raw: String, target: &mut T) {
    match raw.parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}

/// Apply `POSTBOX_*` overrides using `lookup` to read variables.
pub(crate) fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(val) = lookup("POSTBOX_HTTP_HOST") {
        config.http.host = val;
    }
    if let Some(val) = lookup("POSTBOX_HTTP_PORT") {
        parse_into("POSTBOX_HTTP_PORT", val, &mut config.http.port);
    }
    if let Some(val) = lookup("POSTBOX_HTTP_READ_TIMEOUT_SECS") {
        parse_into("POSTBOX_HTTP_READ_TIMEOUT_SECS", val, &mut config.http.read_timeout_secs);
    }
    if let Some(val) = lookup("POSTBOX_HTTP_SHUTDOWN_TIMEOUT_SECS") {
        parse_into("POSTBOX_HTTP_SHUTDOWN_TIMEOUT_SECS", val, &mut config.http.shutdown_timeout_secs);
    }

    // Database
    if let Some(val) = lookup("POSTBOX_DATABASE_BACKEND") {
        parse_into("POSTBOX_DATABASE_BACKEND", val, &mut config.database.backend);
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_URL") {
        config.database.url = Some(val);
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_USER") {
        config.database.user = val;
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_PASSWORD") {
        config.database.password = val;
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_HOST") {
        config.database.host = val;
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_PORT") {
        parse_into("POSTBOX_DATABASE_PORT", val, &mut config.database.port);
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_NAME") {
        config.database.name = val;
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_SSLMODE") {
        config.database.sslmode = val;
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_MAX_CONNECTIONS") {
        parse_into("POSTBOX_DATABASE_MAX_CONNECTIONS", val, &mut config.database.max_connections);
    }
    if let Some(val) = lookup("POSTBOX_DATABASE_INIT_SCHEMA") {
        parse_into("POSTBOX_DATABASE_INIT_SCHEMA", val, &mut config.database.init_schema);
    }

    // Redis
    if let Some(val) = lookup("POSTBOX_REDIS_ENABLED") {
        parse_into("POSTBOX_REDIS_ENABLED", val, &mut config.redis.enabled);
    }
    if let Some(val) = lookup("POSTBOX_REDIS_URL") {
        config.redis.url = Some(val);
    }
    if let Some(val) = lookup("POSTBOX_REDIS_HOST") {
        config.redis.host = val;
    }
    if let Some(val) = lookup("POSTBOX_REDIS_PORT") {
        parse_into("POSTBOX_REDIS_PORT", val, &mut config.redis.port);
    }
    if let Some(val) = lookup("POSTBOX_REDIS_PASSWORD") {
        config.redis.password = val;
    }
    if let Some(val) = lookup("POSTBOX_REDIS_DB") {
        parse_into("POSTBOX_REDIS_DB", val, &mut config.redis.db);
    }

    // Webhook
    if let Some(val) = lookup("POSTBOX_WEBHOOK_URL") {
        config.webhook.url = val;
    }
    if let Some(val) = lookup("POSTBOX_WEBHOOK_AUTH_TOKEN") {
        config.webhook.auth_token = Some(val);
    }
    if let Some(val) = lookup("POSTBOX_WEBHOOK_CONNECT_TIMEOUT_MS") {
        parse_into("POSTBOX_WEBHOOK_CONNECT_TIMEOUT_MS", val, &mut config.webhook.connect_timeout_ms);
    }
    if let Some(val) = lookup("POSTBOX_WEBHOOK_REQUEST_TIMEOUT_MS") {
        parse_into("POSTBOX_WEBHOOK_REQUEST_TIMEOUT_MS", val, &mut config.webhook.request_timeout_ms);
    }

    // Dispatcher
    if let Some(val) = lookup("POSTBOX_DISPATCHER_BATCH_SIZE") {
        parse_into("POSTBOX_DISPATCHER_BATCH_SIZE", val, &mut config.dispatcher.batch_size);
    }
    if let Some(val) = lookup("POSTBOX_DISPATCHER_POLL_INTERVAL_SECS") {
        parse_into("POSTBOX_DISPATCHER_POLL_INTERVAL_SECS", val, &mut config.dispatcher.poll_interval_secs);
    }
    if let Some(val) = lookup("POSTBOX_DISPATCHER_FAILURE_POLICY") {
        parse_into("POSTBOX_DISPATCHER_FAILURE_POLICY", val, &mut config.dispatcher.failure_policy);
    }
    if let Some(val) = lookup("POSTBOX_DISPATCHER_MAX_CONSECUTIVE_STORE_FAILURES") {
        parse_into(
            "POSTBOX_DISPATCHER_MAX_CONSECUTIVE_STORE_FAILURES",
            val,
            &mut config.dispatcher.max_consecutive_store_failures,
        );
    }
    if let Some(val) = lookup("POSTBOX_DISPATCHER_AUTOSTART") {
        parse_into("POSTBOX_DISPATCHER_AUTOSTART", val, &mut config.dispatcher.autostart);
    }
}
