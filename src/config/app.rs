// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::CacheError;
use crate::utils::DEFAULT_TTL_SECS;

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub backend: BackendSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub default_ttl_seconds: u64,
    /// How long an expired entry may still be served by the stale path
    pub stale_grace_seconds: u64,
    pub fetch_timeout_ms: u64,
    pub refresh_lease_ms: u64,
    pub sweep_interval_seconds: u64,
    pub shutdown_grace_ms: u64,
    pub warm_on_start: bool,
    #[serde(default)]
    pub warmup: Vec<WarmupSeed>,
}

/// Static entry loaded by the `config` warmup category
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
pub struct WarmupSeed {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierChoice {
    #[default]
    Ip,
    Principal,
    Composite,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub limit: u64,
    pub window_ms: u64,
    pub message: String,
    pub headers_enabled: bool,
    pub identifier: IdentifierChoice,
    /// Take the client address from `X-Forwarded-For` when running behind a proxy
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Take the principal from the `x-principal-id` header set by an upstream gateway
    #[serde(default)]
    pub trust_principal_header: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct BackendSettings {
    pub kind: BackendChoice,
    pub redis_url: String,
    pub key_prefix: String,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024,
            default_ttl_seconds: DEFAULT_TTL_SECS,
            stale_grace_seconds: 600,
            fetch_timeout_ms: 5_000,
            refresh_lease_ms: 30_000,
            sweep_interval_seconds: 60,
            shutdown_grace_ms: 5_000,
            warm_on_start: false,
            warmup: Vec::new(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 100,
            window_ms: 60_000,
            message: "Too many requests, please try again later.".to_string(),
            headers_enabled: true,
            identifier: IdentifierChoice::Ip,
            trust_forwarded_for: false,
            trust_principal_header: false,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendChoice::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "cachet".to_string(),
            connect_timeout_ms: 2_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfiguration(
                "cache.max_entries must be positive".to_string(),
            ));
        }
        if self.max_bytes == 0 {
            return Err(CacheError::InvalidConfiguration(
                "cache.max_bytes must be positive".to_string(),
            ));
        }
        if self.default_ttl_seconds == 0 {
            return Err(CacheError::InvalidConfiguration(
                "cache.default_ttl_seconds must be positive".to_string(),
            ));
        }
        if self.fetch_timeout_ms == 0 || self.refresh_lease_ms == 0 {
            return Err(CacheError::InvalidConfiguration(
                "cache.fetch_timeout_ms and cache.refresh_lease_ms must be positive".to_string(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(CacheError::InvalidConfiguration(
                "cache.sweep_interval_seconds must be positive".to_string(),
            ));
        }
        if let Some(seed) = self.warmup.iter().find(|s| s.ttl_seconds == Some(0)) {
            return Err(CacheError::InvalidConfiguration(format!(
                "warmup entry '{}' has a zero ttl",
                seed.key
            )));
        }
        Ok(())
    }
}

impl RateLimitSettings {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.limit == 0 {
            return Err(CacheError::InvalidConfiguration(
                "rate_limit.limit must be positive".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(CacheError::InvalidConfiguration(
                "rate_limit.window_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
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
            env_prefix: "CACHET".to_string(),
        }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = config::Config::builder();

        config = config.set_default("server.host", "0.0.0.0")?;
        config = config.set_default("server.port", 3000)?;
        config = config.set_default("server.request_timeout_secs", 30)?;

        config = config.set_default("cache.max_entries", 10_000)?;
        config = config.set_default("cache.max_bytes", 64 * 1024 * 1024)?;
        config = config.set_default("cache.default_ttl_seconds", DEFAULT_TTL_SECS)?;
        config = config.set_default("cache.stale_grace_seconds", 600)?;
        config = config.set_default("cache.fetch_timeout_ms", 5_000)?;
        config = config.set_default("cache.refresh_lease_ms", 30_000)?;
        config = config.set_default("cache.sweep_interval_seconds", 60)?;
        config = config.set_default("cache.shutdown_grace_ms", 5_000)?;
        config = config.set_default("cache.warm_on_start", false)?;

        config = config.set_default("rate_limit.enabled", true)?;
        config = config.set_default("rate_limit.limit", 100)?;
        config = config.set_default("rate_limit.window_ms", 60_000)?;
        config = config.set_default(
            "rate_limit.message",
            "Too many requests, please try again later.",
        )?;
        config = config.set_default("rate_limit.headers_enabled", true)?;
        config = config.set_default("rate_limit.identifier", "ip")?;
        config = config.set_default("rate_limit.trust_forwarded_for", false)?;
        config = config.set_default("rate_limit.trust_principal_header", false)?;

        config = config.set_default("backend.kind", "memory")?;
        config = config.set_default("backend.redis_url", "redis://127.0.0.1:6379")?;
        config = config.set_default("backend.key_prefix", "cachet")?;
        config = config.set_default("backend.connect_timeout_ms", 2_000)?;

        config = config.set_default("logging.level", "info")?;
        config = config.set_default("logging.json", false)?;

        if let Some(path) = &self.config_path {
            if path.exists() {
                config = config.add_source(config::File::from(path.clone()));
            }
        } else {
            let default_config = PathBuf::from("cachet.toml");
            if default_config.exists() {
                config = config.add_source(config::File::with_name("cachet"));
            }
        }

        config = config.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true),
        );

        config.build()?.try_deserialize().map_err(ConfigError::from)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Message(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] CacheError),
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Message(e.to_string())
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        ConfigLoader::new().load()
    }

    pub fn load_with_path<P: Into<PathBuf>>(path: P) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        ConfigLoader::new().with_config_path(path).load()
    }

    /// Rejects settings that would make the service misbehave before any request is served
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn save_to_file<P: Into<PathBuf>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = self.to_toml_string().map_err(std::io::Error::other)?;
        std::fs::write(path.into(), content)
    }
}
