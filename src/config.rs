//! Service configuration.
//!
//! Settings come from an optional YAML document and are then overridden by
//! `TIERCACHE_*` environment variables:
//!
//! ```yaml
//! redis_url: redis://127.0.0.1:6379
//! failure_threshold: 3
//! sweep_interval_secs: 60
//! namespaces:
//!   anime:
//!     ttl_secs: 3600
//!     max_local_entries: 500
//!   typing:
//!     ttl_secs: 10
//!     max_local_entries: 2000
//!     use_distributed_tier: false
//! ```

use crate::cache::{validate_namespace, NamespaceConfig, NamespaceRegistry, RedisConfig};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Distributed tier URL; `None` runs the cache local-only.
    pub redis_url: Option<String>,
    /// Name the health tracker uses for the distributed tier.
    pub backend_name: String,
    pub pool_size: usize,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    /// Consecutive failures before the distributed tier is bypassed.
    pub failure_threshold: u32,
    pub sweep_interval_secs: u64,
    /// Start from the built-in namespace table before applying `namespaces`.
    pub seed_default_namespaces: bool,
    pub namespaces: HashMap<String, NamespaceConfig>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            backend_name: "redis".to_string(),
            pool_size: 16,
            connect_timeout_ms: 5_000,
            command_timeout_ms: 2_000,
            failure_threshold: 3,
            sweep_interval_secs: 60,
            seed_default_namespaces: true,
            namespaces: HashMap::new(),
        }
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

impl CacheSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let settings = Self::default().with_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `TIERCACHE_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment, in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("TIERCACHE_REDIS_URL") {
            let url = url.trim().to_string();
            self.redis_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(v) = env_parse(&lookup, "TIERCACHE_POOL_SIZE") {
            self.pool_size = v;
        }
        if let Some(v) = env_parse(&lookup, "TIERCACHE_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = env_parse(&lookup, "TIERCACHE_COMMAND_TIMEOUT_MS") {
            self.command_timeout_ms = v;
        }
        if let Some(v) = env_parse(&lookup, "TIERCACHE_FAILURE_THRESHOLD") {
            self.failure_threshold = v;
        }
        if let Some(v) = env_parse(&lookup, "TIERCACHE_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ref raw) = self.redis_url {
            let parsed = url::Url::parse(raw).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid redis_url: {}", e),
                    ErrorContext::new().with_field_path("redis_url").with_source("settings"),
                )
            })?;
            if !matches!(parsed.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
                return Err(Error::configuration_with_context(
                    format!("unsupported redis_url scheme '{}'", parsed.scheme()),
                    ErrorContext::new()
                        .with_field_path("redis_url")
                        .with_details("expected redis://, rediss:// or unix://")
                        .with_source("settings"),
                ));
            }
        }
        let positive: [(&str, u64); 5] = [
            ("failure_threshold", u64::from(self.failure_threshold)),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("command_timeout_ms", self.command_timeout_ms),
            ("pool_size", self.pool_size as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(Error::configuration_with_context(
                    format!("{} must be greater than zero", field),
                    ErrorContext::new().with_field_path(field).with_source("settings"),
                ));
            }
        }
        for (name, ns) in &self.namespaces {
            validate_namespace(name, ns)?;
        }
        Ok(())
    }

    pub fn redis_config(&self) -> Option<RedisConfig> {
        let url = self.redis_url.as_ref()?;
        Some(
            RedisConfig::new(url.clone())
                .with_pool_size(self.pool_size)
                .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
                .with_command_timeout(Duration::from_millis(self.command_timeout_ms)),
        )
    }

    pub fn registry(&self) -> NamespaceRegistry {
        let registry = if self.seed_default_namespaces {
            NamespaceRegistry::new()
        } else {
            NamespaceRegistry::empty()
        };
        for (name, cfg) in &self.namespaces {
            registry.register(name.clone(), *cfg);
        }
        registry
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
