//! Helper state written while the distributed tier is degraded must still
//! hold once it recovers: degrade, act, recover, act again.

use std::sync::Arc;
use std::time::Duration;
use tiercache::cache::{CacheService, MemoryRemote, WriteOutcome};
use tiercache::HealthState;

fn dual(remote: &Arc<MemoryRemote>) -> CacheService {
    CacheService::builder()
        .with_remote(remote.clone())
        .without_background_tasks()
        .build()
}

fn degrade(cache: &CacheService) {
    cache.health().mark_degraded("redis", "outage");
    assert_eq!(cache.backend_state(), HealthState::Degraded);
}

fn recover(cache: &CacheService) {
    cache.health().mark_healthy("redis");
    assert_eq!(cache.backend_state(), HealthState::Healthy);
}

#[tokio::test]
async fn test_deadline_armed_while_degraded_is_reported_after_recovery() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = dual(&remote);
    let other = dual(&remote);

    degrade(&cache);
    let outcome = cache.set_inactivity_deadline("g1", Duration::ZERO).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Degraded);
    recover(&cache);

    assert_eq!(cache.take_expired_deadlines().await, vec!["g1".to_string()]);
    assert!(cache.take_expired_deadlines().await.is_empty());
    assert!(other.take_expired_deadlines().await.is_empty());
    assert!(remote.peek("inactivity:g1").is_none());
}

#[tokio::test]
async fn test_deadline_not_yet_due_survives_recovery() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = dual(&remote);
    let other = dual(&remote);

    degrade(&cache);
    cache
        .set_inactivity_deadline("g2", Duration::from_secs(600))
        .await
        .unwrap();
    recover(&cache);

    assert!(cache.take_expired_deadlines().await.is_empty());
    // The scan replicated the pending deadline, so clearing reaches both tiers.
    assert!(remote.peek("inactivity:g2").is_some());
    assert!(other.clear_inactivity_deadline("g2").await);
}

#[tokio::test]
async fn test_cooldown_armed_while_degraded_holds_after_recovery() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = dual(&remote);
    let other = dual(&remote);
    let cooldown = Duration::from_secs(30);

    degrade(&cache);
    assert!(cache.check_and_set_cooldown("play", "u1", cooldown).await.passed);
    recover(&cache);

    let again = cache.check_and_set_cooldown("play", "u1", cooldown).await;
    assert!(!again.passed);
    assert!(again.remaining > Duration::from_secs(25) && again.remaining <= cooldown);

    // Now visible to every process sharing the distributed tier.
    assert!(!other.check_and_set_cooldown("play", "u1", cooldown).await.passed);

    assert!(cache.clear_cooldown("play", "u1").await);
    assert!(other.check_and_set_cooldown("play", "u1", cooldown).await.passed);
}

#[tokio::test]
async fn test_rate_limit_count_carries_over_recovery() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = dual(&remote);
    let other = dual(&remote);
    let window = Duration::from_secs(60);

    degrade(&cache);
    for _ in 0..3 {
        assert!(cache.check_rate_limit("user:1", 3, window).await.allowed);
    }
    recover(&cache);

    let fourth = cache.check_rate_limit("user:1", 3, window).await;
    assert!(!fourth.allowed);
    assert_eq!(fourth.count, 4);
    assert!(fourth.reset_in <= window);
    assert_eq!(remote.peek("ratelimit:user:1").as_deref(), Some("4"));

    let fifth = other.check_rate_limit("user:1", 3, window).await;
    assert_eq!(fifth.count, 5);
    assert!(!fifth.allowed);
}

#[tokio::test]
async fn test_warnings_carry_over_recovery() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = dual(&remote);
    let other = dual(&remote);
    let reset_after = Duration::from_secs(3600);

    assert_eq!(cache.increment_warning("g", "u", reset_after).await, 1);
    degrade(&cache);
    assert_eq!(cache.increment_warning("g", "u", reset_after).await, 2);
    recover(&cache);

    assert_eq!(cache.warning_count("g", "u").await, 2);
    assert_eq!(cache.increment_warning("g", "u", reset_after).await, 3);
    assert_eq!(other.warning_count("g", "u").await, 3);
}

#[tokio::test]
async fn test_warning_increment_right_after_recovery_merges() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = dual(&remote);
    let reset_after = Duration::from_secs(3600);

    assert_eq!(cache.increment_warning("g", "u", reset_after).await, 1);
    degrade(&cache);
    assert_eq!(cache.increment_warning("g", "u", reset_after).await, 2);
    assert_eq!(cache.increment_warning("g", "u", reset_after).await, 3);
    recover(&cache);

    assert_eq!(cache.increment_warning("g", "u", reset_after).await, 4);
    assert_eq!(remote.peek("warnings:g:u").as_deref(), Some("4"));
}

#[tokio::test]
async fn test_queue_state_preserved_while_degraded_restores_once() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = dual(&remote);

    degrade(&cache);
    let outcome = cache
        .preserve_queue_state("g1", &vec!["intro", "outro"], None)
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Degraded);
    recover(&cache);

    let restored: Option<Vec<String>> = cache.restore_queue_state("g1").await;
    assert_eq!(restored, Some(vec!["intro".to_string(), "outro".to_string()]));
    assert_eq!(cache.restore_queue_state::<Vec<String>>("g1").await, None);
    assert!(remote.peek("queue:g1").is_none());
}

#[tokio::test]
async fn test_spam_tracking_continues_across_recovery() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = dual(&remote);
    let other = dual(&remote);
    let window = Duration::from_secs(30);

    degrade(&cache);
    assert_eq!(cache.track_message("g", "u", "buy now", window).await, 1);
    assert_eq!(cache.track_message("g", "u", "buy  NOW", window).await, 2);
    recover(&cache);

    assert_eq!(cache.track_message("g", "u", "buy now", window).await, 3);
    assert_eq!(other.track_message("g", "u", "buy now", window).await, 4);
    assert_eq!(other.track_message("g", "u", "hello", window).await, 1);
}

#[tokio::test]
async fn test_cooldown_survives_outage_recovered_by_connect_event() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = CacheService::builder()
        .with_remote(remote.clone())
        .with_reconnect_interval(None)
        .build();

    remote.set_unavailable(true);
    for _ in 0..3 {
        cache.get::<String>("api", "k").await;
    }
    assert_eq!(cache.backend_state(), HealthState::Degraded);
    assert!(cache
        .check_and_set_cooldown("skip", "u1", Duration::from_secs(30))
        .await
        .passed);

    remote.set_unavailable(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.backend_state(), HealthState::Healthy);

    assert!(!cache
        .check_and_set_cooldown("skip", "u1", Duration::from_secs(30))
        .await
        .passed);
    assert!(remote.peek("cooldown:skip:u1").is_some());
    cache.shutdown().await;
}
