//! Operation metrics.

use crate::resilience::HealthState;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read-only snapshot returned by [`CacheService::stats`](super::CacheService::stats).
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub errors: u64,
    pub distributed_hits: u64,
    pub local_hits: u64,
    pub distributed_fallbacks: u64,
    /// Name of the distributed backend, `None` when running local-only.
    pub backend: Option<&'static str>,
    pub backend_state: HealthState,
    /// Whether the distributed tier is configured and not degraded.
    pub backend_connected: bool,
    pub namespaces: Vec<String>,
    pub local_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 { let total = self.hits + self.misses; if total == 0 { 0.0 } else { self.hits as f64 / total as f64 } }
}

#[derive(Default)]
pub(crate) struct AtomicStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub deletes: AtomicU64,
    pub errors: AtomicU64,
    pub distributed_hits: AtomicU64,
    pub local_hits: AtomicU64,
    pub distributed_fallbacks: AtomicU64,
}

impl AtomicStats {
    pub fn bump(counter: &AtomicU64) { counter.fetch_add(1, Ordering::Relaxed); }

    pub fn reset(&self) {
        for c in [&self.hits, &self.misses, &self.writes, &self.deletes, &self.errors, &self.distributed_hits, &self.local_hits, &self.distributed_fallbacks] { c.store(0, Ordering::Relaxed); }
    }

    /// Counter values; the caller fills in backend and namespace facts.
    pub fn counters(&self) -> [u64; 8] {
        [&self.hits, &self.misses, &self.writes, &self.deletes, &self.errors, &self.distributed_hits, &self.local_hits, &self.distributed_fallbacks].map(|c| c.load(Ordering::Relaxed))
    }
}
