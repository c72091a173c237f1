//! Atomic helpers for bot-style workloads: rate limits, cooldowns, spam
//! tracking, warnings, queue snapshots and inactivity deadlines.
//!
//! Every helper is a thin composition over [`CacheService`] primitives and
//! inherits its degradation behavior: with the distributed tier down they keep
//! answering from the local tier.

use super::key::fingerprint;
use super::namespace::names;
use super::service::{CacheService, WriteOutcome};
use crate::Result;
use futures::future::join_all;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Outcome of a fixed-window rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests counted in the current window, this one included.
    pub count: i64,
    pub remaining: u64,
    /// Time until the window resets.
    pub reset_in: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownCheck {
    /// True when the cooldown was free and has now been armed.
    pub passed: bool,
    /// Time left on the cooldown (the full duration when just armed).
    pub remaining: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageTrack {
    fingerprint: String,
    count: u32,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn pair(scope: &str, actor: &str) -> String {
    format!("{}:{}", scope, actor)
}

impl CacheService {
    /// Count a request against `limit` per `window`.
    ///
    /// The window is fixed: it starts with the first request and is not
    /// extended by later ones.
    pub async fn check_rate_limit(&self, key: &str, limit: u64, window: Duration) -> RateLimitDecision {
        let (count, reset_in) = self.increment_window(names::RATE_LIMIT, key, window).await;
        let used = count.max(0) as u64;
        let decision = RateLimitDecision {
            allowed: used <= limit,
            count,
            remaining: limit.saturating_sub(used),
            reset_in,
        };
        if !decision.allowed {
            debug!(key, count, limit, "rate limit exceeded");
        }
        decision
    }

    /// Check and arm a per-(command, actor) cooldown in one atomic step.
    ///
    /// Of many concurrent callers exactly one passes.
    pub async fn check_and_set_cooldown(&self, command: &str, actor: &str, cooldown: Duration) -> CooldownCheck {
        let key = pair(command, actor);
        let expires_at = unix_millis().saturating_add(cooldown.as_millis() as u64);
        match self
            .set_if_absent(names::COOLDOWN, &key, &expires_at, Some(cooldown))
            .await
        {
            Ok(true) => {
                return CooldownCheck {
                    passed: true,
                    remaining: cooldown,
                }
            }
            Ok(false) => {}
            Err(e) => warn!(command, actor, error = %e, "cooldown could not be armed"),
        }
        let stored: Option<u64> = self.lookup(names::COOLDOWN, &key, false).await;
        let mut remaining = stored
            .map(|t| Duration::from_millis(t.saturating_sub(unix_millis())))
            .unwrap_or_default();
        if remaining.is_zero() {
            // The distributed tier rounds expiries up to whole seconds.
            remaining = self
                .remaining_ttl(names::COOLDOWN, &key)
                .await
                .unwrap_or_default();
        }
        CooldownCheck {
            passed: false,
            remaining,
        }
    }

    pub async fn clear_cooldown(&self, command: &str, actor: &str) -> bool {
        self.delete(names::COOLDOWN, &pair(command, actor)).await
    }

    /// Record a message and return how many times in a row this actor has sent
    /// the same content within `window`. A different message restarts at 1.
    pub async fn track_message(&self, scope: &str, actor: &str, content: &str, window: Duration) -> u32 {
        let key = pair(scope, actor);
        let fp = fingerprint(content);
        let previous: Option<MessageTrack> = self.lookup(names::SPAM, &key, false).await;
        let count = match previous {
            Some(t) if t.fingerprint == fp => t.count.saturating_add(1),
            _ => 1,
        };
        let track = MessageTrack {
            fingerprint: fp,
            count,
        };
        if let Err(e) = self.set(names::SPAM, &key, &track, Some(window)).await {
            warn!(scope, actor, error = %e, "message track not stored");
        }
        count
    }

    /// Add a warning; the count expires `reset_after` the most recent one.
    pub async fn increment_warning(&self, scope: &str, actor: &str, reset_after: Duration) -> i64 {
        self.increment(names::WARNINGS, &pair(scope, actor), Some(reset_after))
            .await
    }

    pub async fn warning_count(&self, scope: &str, actor: &str) -> i64 {
        self.lookup(names::WARNINGS, &pair(scope, actor), false)
            .await
            .unwrap_or(0)
    }

    pub async fn reset_warnings(&self, scope: &str, actor: &str) -> bool {
        self.delete(names::WARNINGS, &pair(scope, actor)).await
    }

    /// Snapshot a playback queue so it survives a restart or reconnect.
    pub async fn preserve_queue_state<T: Serialize + ?Sized>(
        &self,
        scope: &str,
        state: &T,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome> {
        self.set(names::QUEUE, scope, state, ttl).await
    }

    /// Take a preserved queue snapshot; it is removed once returned.
    pub async fn restore_queue_state<T: DeserializeOwned>(&self, scope: &str) -> Option<T> {
        let state = self.lookup(names::QUEUE, scope, false).await?;
        self.delete(names::QUEUE, scope).await;
        Some(state)
    }

    pub async fn discard_queue_state(&self, scope: &str) -> bool {
        self.delete(names::QUEUE, scope).await
    }

    /// Arm an inactivity deadline `after` from now for `scope`.
    ///
    /// The entry outlives the deadline by the namespace TTL so
    /// [`take_expired_deadlines`](Self::take_expired_deadlines) can observe it.
    pub async fn set_inactivity_deadline(&self, scope: &str, after: Duration) -> Result<WriteOutcome> {
        let deadline = unix_millis().saturating_add(after.as_millis() as u64);
        let grace = self.namespace_config(names::INACTIVITY).ttl();
        self.set(names::INACTIVITY, scope, &deadline, Some(after + grace))
            .await
    }

    pub async fn clear_inactivity_deadline(&self, scope: &str) -> bool {
        self.delete(names::INACTIVITY, scope).await
    }

    /// Scopes whose deadline has passed. Each returned scope has been removed,
    /// and across processes a scope is reported by at most one caller.
    pub async fn take_expired_deadlines(&self) -> Vec<String> {
        let now = unix_millis();
        let scopes = self.scan_keys(names::INACTIVITY).await;
        let mut due = Vec::new();
        for scope in scopes {
            let deadline: Option<u64> = self.lookup(names::INACTIVITY, &scope, false).await;
            if deadline.is_some_and(|d| d <= now) {
                due.push(scope);
            }
        }
        let claims = join_all(due.iter().map(|s| self.claim(names::INACTIVITY, s))).await;
        due.into_iter()
            .zip(claims)
            .filter_map(|(scope, claimed)| claimed.then_some(scope))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::remote::MemoryRemote;
    use std::sync::Arc;

    fn local() -> CacheService {
        CacheService::builder().without_background_tasks().build()
    }

    #[test]
    fn test_pair_key() {
        assert_eq!(pair("play", "u1"), "play:u1");
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let cache = local();
        let window = Duration::from_secs(60);
        for i in 1..=3 {
            let d = cache.check_rate_limit("u1", 3, window).await;
            assert!(d.allowed);
            assert_eq!(d.count, i);
            assert_eq!(d.remaining, 3 - i as u64);
        }
        let d = cache.check_rate_limit("u1", 3, window).await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert!(d.reset_in <= window);
        assert!(cache.check_rate_limit("u2", 3, window).await.allowed);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_until_cleared() {
        let cache = local();
        let first = cache
            .check_and_set_cooldown("play", "u1", Duration::from_secs(30))
            .await;
        assert!(first.passed);
        let second = cache
            .check_and_set_cooldown("play", "u1", Duration::from_secs(30))
            .await;
        assert!(!second.passed);
        assert!(second.remaining > Duration::from_secs(25));
        assert!(cache.clear_cooldown("play", "u1").await);
        assert!(
            cache
                .check_and_set_cooldown("play", "u1", Duration::from_secs(30))
                .await
                .passed
        );
    }

    #[tokio::test]
    async fn test_cooldown_expires_locally() {
        let cache = local();
        let cd = Duration::from_millis(40);
        assert!(cache.check_and_set_cooldown("skip", "u1", cd).await.passed);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.check_and_set_cooldown("skip", "u1", cd).await.passed);
    }

    #[tokio::test]
    async fn test_track_message_counts_repeats() {
        let cache = local();
        let w = Duration::from_secs(30);
        assert_eq!(cache.track_message("g", "u", "buy gold", w).await, 1);
        assert_eq!(cache.track_message("g", "u", "Buy   GOLD", w).await, 2);
        assert_eq!(cache.track_message("g", "u", "hello", w).await, 1);
        assert_eq!(cache.track_message("g", "other", "hello", w).await, 1);
    }

    #[tokio::test]
    async fn test_warnings() {
        let cache = local();
        let reset = Duration::from_secs(3600);
        assert_eq!(cache.warning_count("g", "u").await, 0);
        assert_eq!(cache.increment_warning("g", "u", reset).await, 1);
        assert_eq!(cache.increment_warning("g", "u", reset).await, 2);
        assert_eq!(cache.warning_count("g", "u").await, 2);
        assert!(cache.reset_warnings("g", "u").await);
        assert_eq!(cache.warning_count("g", "u").await, 0);
    }

    #[tokio::test]
    async fn test_queue_state_is_taken_once() {
        let cache = local();
        let tracks = vec!["a".to_string(), "b".to_string()];
        cache.preserve_queue_state("g1", &tracks, None).await.unwrap();
        let restored: Option<Vec<String>> = cache.restore_queue_state("g1").await;
        assert_eq!(restored, Some(tracks));
        assert!(cache.restore_queue_state::<Vec<String>>("g1").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_deadlines_reported_once() {
        let cache = local();
        cache
            .set_inactivity_deadline("g1", Duration::ZERO)
            .await
            .unwrap();
        cache
            .set_inactivity_deadline("g2", Duration::from_secs(600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.take_expired_deadlines().await, vec!["g1".to_string()]);
        assert!(cache.take_expired_deadlines().await.is_empty());
        assert!(cache.clear_inactivity_deadline("g2").await);
    }

    #[tokio::test]
    async fn test_cooldown_single_winner_over_shared_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let a = CacheService::builder()
            .with_remote(remote.clone())
            .without_background_tasks()
            .build();
        let b = CacheService::builder()
            .with_remote(remote.clone())
            .without_background_tasks()
            .build();
        let cd = Duration::from_secs(10);
        let (ra, rb) = tokio::join!(
            a.check_and_set_cooldown("play", "u1", cd),
            b.check_and_set_cooldown("play", "u1", cd)
        );
        assert!(ra.passed ^ rb.passed);
    }
}
