//! Cache key construction and content fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fully-qualified key: `<namespace>:<key>`.
///
/// Used verbatim as the distributed-tier key; the local tier indexes its
/// per-namespace sub-store by `key` alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub namespace: String,
    pub key: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), key: key.into() }
    }

    /// Rendered `namespace:key` form.
    pub fn qualified(&self) -> String { format!("{}:{}", self.namespace, self.key) }

    /// `SCAN` pattern matching every key of a namespace.
    pub fn namespace_pattern(namespace: &str) -> String { format!("{}:*", namespace) }

    /// Split a qualified key back into namespace and key. The namespace never contains `:`.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (ns, key) = qualified.split_once(':')?;
        Some(Self::new(ns, key))
    }

    /// Key for a (scope, actor) pair, e.g. `guild:user`.
    pub fn scoped(namespace: impl Into<String>, scope: &str, actor: &str) -> Self {
        Self::new(namespace, format!("{}:{}", scope, actor))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}:{}", self.namespace, self.key) }
}

/// Compact SHA-256 fingerprint of message content.
///
/// Whitespace is collapsed and case folded first so trivially re-spaced repeats still match.
pub fn fingerprint(content: &str) -> String {
    let normalized: String = content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.finalize().iter().take(16).map(|b| format!("{:02x}", b)).collect()
}
