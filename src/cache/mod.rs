//! 双层缓存模块：分布式层（Redis 兼容）加进程内回退层。
//!
//! # Dual-Tier Cache Module
//!
//! Every write goes to both tiers; reads prefer the distributed tier and fall
//! back to the local tier whenever the distributed tier is disabled for the
//! namespace, degraded, failing, or simply missing the key.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheService`] | Orchestrator: get/set/delete/increment/get_or_compute plus atomic helpers |
//! | [`LocalStore`] | Process-local tier with TTL, per-namespace capacity and LRU-style eviction |
//! | [`RemoteStore`] | Seam for the distributed tier |
//! | [`RedisStore`] | `deadpool-redis` implementation of [`RemoteStore`] |
//! | [`MemoryRemote`] | In-memory [`RemoteStore`] with Redis semantics and failure injection |
//! | [`NamespaceRegistry`] | Namespace → TTL / capacity / tier selection |
//! | [`CacheKey`] | `namespace:key` construction |
//! | [`CacheStats`] | Read-only metrics snapshot |
//!
//! ## Example
//!
//! ```rust
//! use tiercache::cache::{CacheService, NamespaceConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = CacheService::local();
//! cache
//!     .register_namespace("anime", NamespaceConfig::new(3600, 500, true))
//!     .unwrap();
//!
//! cache.set("anime", "42", &"Cowboy Bebop", None).await.unwrap();
//! let title: Option<String> = cache.get("anime", "42").await;
//! assert_eq!(title.as_deref(), Some("Cowboy Bebop"));
//!
//! let decision = cache
//!     .check_rate_limit("user:1", 5, std::time::Duration::from_secs(60))
//!     .await;
//! assert!(decision.allowed);
//! # }
//! ```

mod guards;
mod key;
mod local;
pub mod namespace;
mod redis;
mod remote;
mod service;
mod stats;

pub use guards::{CooldownCheck, RateLimitDecision};
pub use key::{fingerprint, CacheKey};
pub use local::LocalStore;
pub use namespace::{
    names, validate_namespace, NamespaceConfig, NamespaceRegistry, DEFAULT_NAMESPACES,
    FALLBACK_NAMESPACE,
};
pub use redis::{RedisConfig, RedisStore};
pub use remote::{ConnectionEvent, MemoryRemote, RemoteStore};
pub use service::{CacheService, CacheServiceBuilder, WriteOutcome};
pub use stats::CacheStats;
