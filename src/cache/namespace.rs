//! Namespace registry: per-namespace TTL, local capacity and tier policy.

use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Policy for one partition of the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Default time-to-live in seconds.
    #[serde(rename = "ttl_secs")]
    pub ttl_seconds: u64,
    /// Capacity of the local tier sub-store for this namespace.
    pub max_local_entries: usize,
    /// When false the distributed tier is never contacted for this namespace.
    #[serde(default = "default_true")]
    pub use_distributed_tier: bool,
}

fn default_true() -> bool {
    true
}

impl NamespaceConfig {
    pub const fn new(ttl_seconds: u64, max_local_entries: usize, use_distributed_tier: bool) -> Self {
        Self {
            ttl_seconds,
            max_local_entries,
            use_distributed_tier,
        }
    }

    /// Local-only namespace (high-churn data that must never leave the process).
    pub const fn local_only(ttl_seconds: u64, max_local_entries: usize) -> Self {
        Self::new(ttl_seconds, max_local_entries, false)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        FALLBACK_NAMESPACE
    }
}

/// Configuration applied to namespaces nobody registered.
pub const FALLBACK_NAMESPACE: NamespaceConfig = NamespaceConfig::new(300, 1000, true);

/// Namespaces the specialized helpers rely on.
pub mod names {
    pub const DEFAULT: &str = "default";
    pub const API: &str = "api";
    pub const RATE_LIMIT: &str = "ratelimit";
    pub const COOLDOWN: &str = "cooldown";
    pub const SPAM: &str = "spam";
    pub const WARNINGS: &str = "warnings";
    pub const QUEUE: &str = "queue";
    pub const INACTIVITY: &str = "inactivity";
    pub const SESSION: &str = "session";
}

/// Built-in namespace table used to seed [`NamespaceRegistry::new`].
pub static DEFAULT_NAMESPACES: Lazy<HashMap<String, NamespaceConfig>> = Lazy::new(|| {
    [
        (names::DEFAULT, FALLBACK_NAMESPACE),
        (names::API, NamespaceConfig::new(600, 500, true)),
        (names::RATE_LIMIT, NamespaceConfig::new(60, 10_000, true)),
        (names::COOLDOWN, NamespaceConfig::new(60, 10_000, true)),
        (names::SPAM, NamespaceConfig::new(30, 5_000, true)),
        (names::WARNINGS, NamespaceConfig::new(86_400, 5_000, true)),
        (names::QUEUE, NamespaceConfig::new(3_600, 200, true)),
        (names::INACTIVITY, NamespaceConfig::new(3_600, 1_000, true)),
        (names::SESSION, NamespaceConfig::local_only(1_800, 1_000)),
    ]
    .into_iter()
    .map(|(n, c)| (n.to_string(), c))
    .collect()
});

/// Characters that would break `ns:key` parsing or `SCAN ns:*` patterns.
const RESERVED_CHARS: &[char] = &[':', '*', '?', '[', ']', '\\'];

/// Check a namespace name and its policy before it enters a registry.
///
/// Names must be non-empty and free of `:` and glob metacharacters; TTL and
/// local capacity must be positive.
pub fn validate_namespace(name: &str, config: &NamespaceConfig) -> Result<()> {
    if name.is_empty() || name.contains(RESERVED_CHARS) {
        return Err(Error::configuration_with_context(
            format!("invalid namespace name '{}'", name),
            ErrorContext::new()
                .with_field_path(format!("namespaces.{}", name))
                .with_details("namespace names must be non-empty and must not contain ':', '*', '?', '[', ']' or '\\'")
                .with_source("namespace_registry"),
        ));
    }
    if config.ttl_seconds == 0 || config.max_local_entries == 0 {
        return Err(Error::configuration_with_context(
            "ttl_secs and max_local_entries must be greater than zero",
            ErrorContext::new()
                .with_field_path(format!("namespaces.{}", name))
                .with_source("namespace_registry"),
        ));
    }
    Ok(())
}

/// Mapping from namespace name to [`NamespaceConfig`].
///
/// Reads are lock-free snapshots; `register` swaps in a new table, so it is
/// cheap to consult on every operation and rare to mutate.
pub struct NamespaceRegistry {
    table: ArcSwap<HashMap<String, NamespaceConfig>>,
    fallback: NamespaceConfig,
}

impl NamespaceRegistry {
    /// Registry seeded with the built-in table.
    pub fn new() -> Self {
        Self::with_table(DEFAULT_NAMESPACES.clone())
    }

    /// Registry with no seeded namespaces (every lookup resolves to the fallback).
    pub fn empty() -> Self {
        Self::with_table(HashMap::new())
    }

    pub fn with_table(table: HashMap<String, NamespaceConfig>) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            fallback: FALLBACK_NAMESPACE,
        }
    }

    pub fn with_fallback(mut self, fallback: NamespaceConfig) -> Self {
        self.fallback = fallback;
        self
    }

    /// Register or fully replace a namespace.
    pub fn register(&self, name: impl Into<String>, config: NamespaceConfig) {
        let name = name.into();
        self.table.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(name.clone(), config);
            next
        });
    }

    /// [`register`](Self::register) after [`validate_namespace`].
    pub fn try_register(&self, name: impl Into<String>, config: NamespaceConfig) -> Result<()> {
        let name = name.into();
        validate_namespace(&name, &config)?;
        self.register(name, config);
        Ok(())
    }

    /// Configuration for `name`; unknown namespaces resolve to the fallback.
    pub fn resolve(&self, name: &str) -> NamespaceConfig {
        match self.table.load().get(name) {
            Some(cfg) => *cfg,
            None => {
                tracing::debug!(namespace = %name, "unregistered namespace, using fallback config");
                self.fallback
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<NamespaceConfig> {
        self.table.load().get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.load().contains_key(name)
    }

    /// Registered namespace names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn fallback(&self) -> NamespaceConfig {
        self.fallback
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_defaults() {
        let reg = NamespaceRegistry::new();
        assert!(reg.contains(names::RATE_LIMIT));
        assert!(!reg.resolve(names::SESSION).use_distributed_tier);
        assert_eq!(reg.resolve(names::API).ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_unknown_namespace_uses_fallback() {
        let reg = NamespaceRegistry::empty().with_fallback(NamespaceConfig::new(5, 3, false));
        let cfg = reg.resolve("nope");
        assert_eq!(cfg, NamespaceConfig::new(5, 3, false));
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let reg = NamespaceRegistry::empty();
        reg.register("media", NamespaceConfig::new(10, 10, true));
        reg.register("media", NamespaceConfig::local_only(20, 5));
        assert_eq!(reg.resolve("media"), NamespaceConfig::local_only(20, 5));
        assert_eq!(reg.names(), vec!["media".to_string()]);
    }

    #[test]
    fn test_try_register_rejects_reserved_names() {
        let reg = NamespaceRegistry::empty();
        let cfg = NamespaceConfig::new(10, 10, true);
        for bad in ["", "a:b", "a*", "a?", "[ab]", "a\\b"] {
            let err = reg.try_register(bad, cfg).unwrap_err();
            assert!(err.to_string().contains("invalid namespace name"), "{bad}");
        }
        assert!(reg.try_register("media", NamespaceConfig::new(0, 10, true)).is_err());
        assert!(reg.try_register("media", NamespaceConfig::new(10, 0, true)).is_err());
        assert!(reg.names().is_empty());

        reg.try_register("media-v2_x.y", cfg).unwrap();
        assert_eq!(reg.resolve("media-v2_x.y"), cfg);
    }

    #[test]
    fn test_deserialize_defaults_distributed_flag() {
        let cfg: NamespaceConfig =
            serde_yaml::from_str("ttl_secs: 42\nmax_local_entries: 7\n").unwrap();
        assert_eq!(cfg, NamespaceConfig::new(42, 7, true));
    }
}
