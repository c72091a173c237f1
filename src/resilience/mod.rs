//! 弹性模块：分布式缓存层的健康跟踪与降级。
//!
//! # Resilience Module
//!
//! Health tracking for the distributed tier. When a backend fails repeatedly
//! the cache stops contacting it and serves from the local tier until the
//! backend proves itself again.
//!
//! ## States
//!
//! - **Healthy**: operations reach the distributed tier
//! - **Degraded**: reached after N consecutive failures (default 3); the distributed tier is bypassed
//! - **Unknown**: nothing recorded yet; treated like healthy
//!
//! Recovery is trigger-based: a successful operation or a connect event. There
//! is no timer that re-opens a degraded backend.
//!
//! ```rust
//! use tiercache::resilience::health::{HealthConfig, HealthState, HealthTracker};
//!
//! let tracker = HealthTracker::new(HealthConfig::new().with_failure_threshold(3));
//! for _ in 0..3 {
//!     tracker.record_failure("redis", "connection reset");
//! }
//! assert_eq!(tracker.state("redis"), HealthState::Degraded);
//!
//! tracker.record_success("redis");
//! assert_eq!(tracker.state("redis"), HealthState::Healthy);
//! ```

pub mod health;

pub use health::{FallbackFn, HealthConfig, HealthSnapshot, HealthState, HealthTracker};
