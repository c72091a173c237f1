//! # tiercache
//!
//! 弹性双层缓存：Redis 兼容的分布式层加进程内回退层，分布式层故障时自动降级。
//!
//! Resilient dual-tier caching for services that must keep answering when
//! their shared cache does not.
//!
//! ## Overview
//!
//! Writes land in a Redis-compatible distributed tier and in a process-local
//! tier. Reads prefer the distributed tier. When it fails repeatedly the
//! health tracker marks it degraded and every operation is served locally
//! until the backend answers again. Cache trouble weakens guarantees (a rate
//! limit becomes per-process instead of global) but never surfaces as an error
//! to the caller.
//!
//! ## Key Features
//!
//! - **Namespaces**: per-namespace TTL, local capacity and tier selection via [`cache::NamespaceRegistry`]
//! - **Atomic counters**: `INCR`+`EXPIRE` pipelines, fixed-window rate limits, `SET NX EX` cooldowns
//! - **Graceful degradation**: trigger-based health tracking via [`resilience`]
//! - **Bot helpers**: spam fingerprints, warning escalation, queue snapshots, inactivity deadlines
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tiercache::{CacheService, CacheSettings};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> tiercache::Result<()> {
//!     let settings = CacheSettings::from_env()?;
//!     let cache = CacheService::from_settings(&settings).await?;
//!
//!     let cooldown = cache
//!         .check_and_set_cooldown("play", "user-1", Duration::from_secs(5))
//!         .await;
//!     if !cooldown.passed {
//!         println!("try again in {:?}", cooldown.remaining);
//!     }
//!
//!     let profile: String = cache
//!         .get_or_compute("api", "profile:1", || async { Ok::<_, std::io::Error>("…".to_string()) }, None)
//!         .await?;
//!     println!("{}", profile);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Cache service, tiers, namespaces, helpers |
//! | [`resilience`] | Backend health tracking and degradation |
//! | [`config`] | YAML and environment settings |
//! | [`error`] | Error type and context |

pub mod cache;
pub mod config;
pub mod resilience;

// Re-export main types for convenience
pub use cache::{CacheService, CacheServiceBuilder, CacheStats, NamespaceConfig, WriteOutcome};
pub use config::CacheSettings;
pub use resilience::{HealthState, HealthTracker};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
