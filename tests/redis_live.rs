//! Tests against a real Redis server.
//!
//! Run with: TIERCACHE_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_live -- --ignored --nocapture

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tiercache::cache::{RedisConfig, RedisStore, RemoteStore};
use tiercache::{CacheService, CacheSettings, HealthState, WriteOutcome};

fn redis_url() -> Option<String> {
    let url = std::env::var("TIERCACHE_TEST_REDIS_URL").ok();
    if url.is_none() {
        eprintln!("TIERCACHE_TEST_REDIS_URL not set, skipping");
    }
    url
}

#[tokio::test]
#[ignore = "requires a Redis server; run with TIERCACHE_TEST_REDIS_URL set"]
async fn test_store_commands() {
    let Some(url) = redis_url() else { return };
    let store = RedisStore::connect(&RedisConfig::new(url)).await.unwrap();
    let key = "tiercache-test:cmd";
    store.del(&[key.to_string()]).await.unwrap();

    store.set_ex(key, "\"v\"", Duration::from_secs(30)).await.unwrap();
    assert_eq!(store.get(key).await.unwrap().as_deref(), Some("\"v\""));
    let ttl = store.ttl(key).await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(30));

    assert!(!store.set_nx_ex(key, "x", Duration::from_secs(5)).await.unwrap());
    assert_eq!(store.scan("tiercache-test:*").await.unwrap(), vec![key.to_string()]);
    assert_eq!(store.del(&[key.to_string()]).await.unwrap(), 1);
    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a Redis server; run with TIERCACHE_TEST_REDIS_URL set"]
async fn test_concurrent_increments() {
    let Some(url) = redis_url() else { return };
    let settings = CacheSettings {
        redis_url: Some(url),
        ..Default::default()
    };
    let cache = Arc::new(CacheService::from_settings(&settings).await.unwrap());
    assert_eq!(cache.backend_state(), HealthState::Healthy);
    cache.delete("ratelimit", "live-burst").await;

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let c = Arc::clone(&cache);
            tokio::spawn(async move { c.increment("ratelimit", "live-burst", None).await })
        })
        .collect();
    let mut seen = HashSet::new();
    for h in handles {
        seen.insert(h.await.unwrap());
    }
    assert_eq!(seen, (1..=50).collect::<HashSet<i64>>());
    cache.delete("ratelimit", "live-burst").await;
    cache.shutdown().await;
}

#[tokio::test]
#[ignore = "requires a Redis server; run with TIERCACHE_TEST_REDIS_URL set"]
async fn test_replicated_write_and_clear() {
    let Some(url) = redis_url() else { return };
    let settings = CacheSettings {
        redis_url: Some(url),
        ..Default::default()
    };
    let cache = CacheService::from_settings(&settings).await.unwrap();
    let outcome = cache.set("tiercache-live", "a", &[1, 2, 3], None).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Replicated);
    assert_eq!(cache.get::<Vec<i32>>("tiercache-live", "a").await, Some(vec![1, 2, 3]));
    assert!(cache.clear_namespace("tiercache-live").await >= 1);
    assert!(!cache.has("tiercache-live", "a").await);
    cache.shutdown().await;
}
