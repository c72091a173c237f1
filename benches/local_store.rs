//! Benchmarks for the cache hot paths
//!
//! This benchmark measures:
//! - Local tier get/set with and without eviction pressure
//! - Local counter increments
//! - Service reads served by the in-memory distributed tier

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tiercache::cache::{fingerprint, CacheService, LocalStore, MemoryRemote};

const TTL: Duration = Duration::from_secs(300);

fn bench_local_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_store");

    let store = LocalStore::new();
    for i in 0..1000 {
        store.set("api", &format!("k{i}"), i.to_string(), TTL, 10_000);
    }
    group.bench_function("get_hit", |b| {
        b.iter(|| black_box(store.get("api", black_box("k500"))))
    });
    group.bench_function("get_miss", |b| {
        b.iter(|| black_box(store.get("api", black_box("absent"))))
    });
    group.bench_function("increment", |b| {
        b.iter(|| black_box(store.increment("ratelimit", "hot", TTL, true, 10_000)))
    });

    for capacity in [100usize, 1000] {
        group.bench_with_input(
            BenchmarkId::new("set_with_eviction", capacity),
            &capacity,
            |b, &cap| {
                let store = LocalStore::new();
                let mut i = 0u64;
                b.iter(|| {
                    i += 1;
                    store.set("bounded", &i.to_string(), "v".to_string(), TTL, cap);
                })
            },
        );
    }
    group.finish();
}

fn bench_service(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let cache = rt.block_on(async {
        let cache = CacheService::builder()
            .with_remote(remote.clone())
            .without_background_tasks()
            .build();
        cache.set("api", "anime:1", &"Cowboy Bebop", None).await.unwrap();
        cache
    });

    let mut group = c.benchmark_group("service");
    group.bench_function("get_distributed_hit", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(cache.get::<String>("api", "anime:1").await) })
    });
    group.bench_function("rate_limit", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(cache.check_rate_limit("user:1", u64::MAX, TTL).await)
        })
    });
    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let msg = "Check out this   AMAZING offer at example dot com ".repeat(8);
    c.bench_function("fingerprint", |b| b.iter(|| black_box(fingerprint(black_box(&msg)))));
}

criterion_group!(benches, bench_local_store, bench_service, bench_fingerprint);
criterion_main!(benches);
