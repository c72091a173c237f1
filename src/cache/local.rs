//! Process-local tier: namespace-partitioned, expiring, capacity-bounded storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
    last_accessed: Instant,
    /// Written while the distributed tier was not reached.
    pending: bool,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now + ttl,
            last_accessed: now,
            pending: false,
        }
    }
    fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct NamespaceStore {
    entries: HashMap<String, CacheEntry>,
}

impl NamespaceStore {
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut CacheEntry> {
        if self.entries.get(key).is_some_and(|e| e.is_expired_at(now)) {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    /// Make room for a new key: drop expired entries first, then the least recently accessed.
    fn evict_if_needed(&mut self, key: &str, max_entries: usize, now: Instant) {
        if self.entries.contains_key(key) || self.entries.len() < max_entries {
            return;
        }
        self.entries.retain(|_, e| !e.is_expired_at(now));
        while !self.entries.is_empty() && self.entries.len() >= max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    tracing::debug!(key = %k, "local tier evicted least recently accessed entry");
                    self.entries.remove(&k);
                }
                None => break,
            }
        }
    }

    fn insert(&mut self, key: &str, value: String, ttl: Duration, max_entries: usize) {
        let now = Instant::now();
        self.evict_if_needed(key, max_entries.max(1), now);
        self.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
    }
}

/// In-process fallback tier.
///
/// Each namespace owns a sub-store behind its own mutex; every
/// read-modify-write helper (`increment`, `set_if_absent`, eviction) runs to
/// completion under that mutex.
pub struct LocalStore {
    namespaces: RwLock<HashMap<String, Arc<Mutex<NamespaceStore>>>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    fn existing(&self, ns: &str) -> Option<Arc<Mutex<NamespaceStore>>> {
        self.namespaces
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(ns)
            .cloned()
    }

    fn namespace(&self, ns: &str) -> Arc<Mutex<NamespaceStore>> {
        if let Some(store) = self.existing(ns) {
            return store;
        }
        let mut map = self.namespaces.write().unwrap_or_else(|p| p.into_inner());
        map.entry(ns.to_string()).or_default().clone()
    }

    fn lock(store: &Mutex<NamespaceStore>) -> MutexGuard<'_, NamespaceStore> {
        // A panic while holding the lock leaves entries consistent; keep serving.
        store.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self, ns: &str, key: &str) -> Option<String> {
        let store = self.existing(ns)?;
        let mut guard = Self::lock(&store);
        let now = Instant::now();
        let entry = guard.live(key, now)?;
        entry.last_accessed = now;
        Some(entry.value.clone())
    }

    pub fn contains(&self, ns: &str, key: &str) -> bool {
        match self.existing(ns) {
            Some(store) => Self::lock(&store).live(key, Instant::now()).is_some(),
            None => false,
        }
    }

    pub fn set(&self, ns: &str, key: &str, value: String, ttl: Duration, max_entries: usize) {
        let store = self.namespace(ns);
        Self::lock(&store).insert(key, value, ttl, max_entries);
    }

    /// Store `value` only if no live entry exists. Returns whether it was stored.
    pub fn set_if_absent(
        &self,
        ns: &str,
        key: &str,
        value: String,
        ttl: Duration,
        max_entries: usize,
    ) -> bool {
        let store = self.namespace(ns);
        let mut guard = Self::lock(&store);
        if guard.live(key, Instant::now()).is_some() {
            return false;
        }
        guard.insert(key, value, ttl, max_entries);
        true
    }

    /// Add one to an integer entry, creating it at 1.
    ///
    /// With `rearm` the expiry restarts on every call; otherwise only a newly
    /// created counter gets `ttl`. Non-integer payloads restart at 1.
    pub fn increment(
        &self,
        ns: &str,
        key: &str,
        ttl: Duration,
        rearm: bool,
        max_entries: usize,
    ) -> i64 {
        let store = self.namespace(ns);
        let mut guard = Self::lock(&store);
        let now = Instant::now();
        if let Some(entry) = guard.live(key, now) {
            if let Ok(current) = entry.value.trim().parse::<i64>() {
                let next = current.saturating_add(1);
                entry.value = next.to_string();
                entry.last_accessed = now;
                if rearm {
                    entry.expires_at = now + ttl;
                }
                return next;
            }
        }
        guard.insert(key, "1".to_string(), ttl, max_entries);
        1
    }

    /// Flag a live entry as held only by this tier.
    pub fn mark_pending(&self, ns: &str, key: &str) {
        if let Some(store) = self.existing(ns) {
            if let Some(entry) = Self::lock(&store).live(key, Instant::now()) {
                entry.pending = true;
            }
        }
    }

    /// Clear the pending flag of a live entry, returning its payload and remaining lifetime.
    pub fn take_pending(&self, ns: &str, key: &str) -> Option<(String, Duration)> {
        let store = self.existing(ns)?;
        let mut guard = Self::lock(&store);
        let now = Instant::now();
        let entry = guard.live(key, now)?;
        if !entry.pending {
            return None;
        }
        entry.pending = false;
        Some((
            entry.value.clone(),
            entry.expires_at.saturating_duration_since(now),
        ))
    }

    pub fn remaining_ttl(&self, ns: &str, key: &str) -> Option<Duration> {
        let store = self.existing(ns)?;
        let mut guard = Self::lock(&store);
        let now = Instant::now();
        guard
            .live(key, now)
            .map(|e| e.expires_at.saturating_duration_since(now))
    }

    pub fn delete(&self, ns: &str, key: &str) -> bool {
        self.remove(ns, key).is_some()
    }

    /// Delete a key. `Some(pending)` when an entry was removed.
    pub fn remove(&self, ns: &str, key: &str) -> Option<bool> {
        let store = self.existing(ns)?;
        let removed = Self::lock(&store).entries.remove(key);
        removed.map(|e| e.pending)
    }

    /// Live keys of a namespace (unqualified).
    pub fn keys(&self, ns: &str) -> Vec<String> {
        let Some(store) = self.existing(ns) else {
            return Vec::new();
        };
        let guard = Self::lock(&store);
        let now = Instant::now();
        guard
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop a namespace sub-store. Returns how many entries it held.
    pub fn clear_namespace(&self, ns: &str) -> usize {
        let removed = self
            .namespaces
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(ns);
        removed.map(|s| Self::lock(&s).entries.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.namespaces
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Remove every expired entry in every namespace, then drop emptied sub-stores.
    pub fn sweep_expired(&self) -> usize {
        let stores: Vec<Arc<Mutex<NamespaceStore>>> = self
            .namespaces
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        let now = Instant::now();
        let mut removed = 0;
        for store in stores {
            let mut guard = Self::lock(&store);
            let before = guard.entries.len();
            guard.entries.retain(|_, e| !e.is_expired_at(now));
            removed += before - guard.entries.len();
        }
        self.drop_empty_namespaces();
        removed
    }

    /// A sub-store still referenced outside the map belongs to an in-flight writer and stays.
    fn drop_empty_namespaces(&self) {
        let mut map = self.namespaces.write().unwrap_or_else(|p| p.into_inner());
        map.retain(|ns, store| {
            let keep = Arc::strong_count(store) > 1 || !Self::lock(store).entries.is_empty();
            if !keep {
                tracing::trace!(namespace = %ns, "dropping empty local namespace");
            }
            keep
        });
    }

    /// Number of namespace sub-stores currently allocated.
    pub fn namespace_count(&self) -> usize {
        self.namespaces
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Live entries across all namespaces.
    pub fn len(&self) -> usize {
        let stores: Vec<Arc<Mutex<NamespaceStore>>> = self
            .namespaces
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        let now = Instant::now();
        stores
            .iter()
            .map(|s| {
                Self::lock(s)
                    .entries
                    .values()
                    .filter(|e| !e.is_expired_at(now))
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn namespace_len(&self, ns: &str) -> usize {
        self.keys(ns).len()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` on the current tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "local tier sweep removed expired entries");
                }
            }
        })
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}
