//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "warden.toml",
    "./config/warden.toml",
    "/etc/warden/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: "WARDEN".to_string(),
        }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
            ..Self::new()
        }
    }

    /// Read overrides from `{prefix}_*` instead of `WARDEN_*`.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from file (if found), apply environment overrides, validate.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!(?path, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => AppConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured file does not exist, searching defaults");
        }

        if let Ok(path) = env::var(self.key("CONFIG")) {
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

    fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.env_prefix, suffix)
    }

    fn var(&self, suffix: &str) -> Option<String> {
        env::var(self.key(suffix)).ok()
    }

    fn parsed<T: std::str::FromStr>(&self, suffix: &str) -> Result<Option<T>, ConfigError> {
        match self.var(suffix) {
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                ConfigError::EnvError(format!("{} has an invalid value: {}", self.key(suffix), raw))
            }),
            None => Ok(None),
        }
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        // Database
        if let Some(val) = self.var("DATABASE_URL") {
            config.database.url = val;
        }
        if let Some(val) = self.parsed("DATABASE_MAX_CONNECTIONS")? {
            config.database.max_connections = val;
        }
        if let Some(val) = self.parsed("DATABASE_ACQUIRE_TIMEOUT_SECS")? {
            config.database.acquire_timeout_secs = val;
        }

        // Redis
        if let Some(val) = self.var("REDIS_URL") {
            config.redis.url = val;
        }
        if let Some(val) = self.var("REDIS_KEY_PREFIX") {
            config.redis.key_prefix = val;
        }
        if let Some(val) = self.parsed("REDIS_TTL_SECS")? {
            config.redis.ttl_secs = val;
        }

        // Role cache
        if let Some(val) = self.parsed("ROLE_CACHE_ENABLED")? {
            config.role_cache.enabled = val;
        }
        if let Some(val) = self.parsed("ROLE_CACHE_QUEUE_CAPACITY")? {
            config.role_cache.queue_capacity = val;
        }
        if let Some(val) = self.parsed("ROLE_CACHE_TASK_TIMEOUT_MS")? {
            config.role_cache.task_timeout_ms = val;
        }

        // Logging
        if let Some(val) = self.var("LOG_FORMAT") {
            config.logging.format = val
                .parse()
                .map_err(|e: wd_common::LoggingError| ConfigError::EnvError(e.to_string()))?;
        }
        if let Some(val) = self.var("LOG_LEVEL") {
            config.logging.level = val;
        }

        // Seed
        if let Some(val) = self.parsed("SEED_ON_STARTUP")? {
            config.seed.on_startup = val;
        }

        Ok(())
    }
}
