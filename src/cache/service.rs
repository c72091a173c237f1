//! Cache service: the dual-tier orchestrator.

use super::key::CacheKey;
use super::local::LocalStore;
use super::namespace::{validate_namespace, NamespaceConfig, NamespaceRegistry};
use super::redis::RedisStore;
use super::remote::{ConnectionEvent, RemoteStore};
use super::stats::{AtomicStats, CacheStats};
use crate::config::CacheSettings;
use crate::resilience::{FallbackFn, HealthConfig, HealthState, HealthTracker};
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored in both tiers.
    Replicated,
    /// The namespace (or the whole service) is local-only.
    LocalOnly,
    /// The distributed tier is degraded and was bypassed; stored locally.
    Degraded,
    /// The distributed write failed; stored locally.
    RemoteFailed,
}

impl WriteOutcome {
    pub fn is_replicated(&self) -> bool {
        matches!(self, WriteOutcome::Replicated)
    }
}

enum Tier<'a> {
    Remote(&'a Arc<dyn RemoteStore>),
    LocalOnly,
    Degraded,
}

pub struct CacheServiceBuilder {
    registry: Option<NamespaceRegistry>,
    remote: Option<Arc<dyn RemoteStore>>,
    backend_name: String,
    health: HealthConfig,
    sweep_interval: Option<Duration>,
    reconnect_interval: Option<Duration>,
    background: bool,
}

impl CacheServiceBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            remote: None,
            backend_name: "redis".to_string(),
            health: HealthConfig::default(),
            sweep_interval: Some(Duration::from_secs(60)),
            reconnect_interval: Some(Duration::from_secs(5)),
            background: true,
        }
    }

    pub fn with_registry(mut self, registry: NamespaceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Name under which the distributed tier is tracked for health.
    pub fn with_backend_name(mut self, name: impl Into<String>) -> Self {
        self.backend_name = name.into();
        self
    }

    pub fn with_health_config(mut self, cfg: HealthConfig) -> Self {
        self.health = cfg;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// How often a degraded backend is probed with `PING`. `None` disables probing.
    pub fn with_reconnect_interval(mut self, interval: Option<Duration>) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Skip the sweeper, reconnect probe and event listener.
    pub fn without_background_tasks(mut self) -> Self {
        self.background = false;
        self
    }

    /// Build the service. Background tasks are spawned when called inside a tokio runtime.
    pub fn build(self) -> CacheService {
        let service = CacheService {
            registry: self.registry.unwrap_or_default(),
            local: Arc::new(LocalStore::new()),
            remote: self.remote,
            backend_name: self.backend_name,
            health: Arc::new(HealthTracker::new(self.health)),
            stats: AtomicStats::default(),
            tasks: Mutex::new(Vec::new()),
        };
        if !self.background {
            return service;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no tokio runtime; cache background tasks not started");
            return service;
        }
        let mut tasks = Vec::new();
        if let Some(interval) = self.sweep_interval {
            tasks.push(service.local.spawn_sweeper(interval));
        }
        if let Some(ref remote) = service.remote {
            if let Some(rx) = remote.subscribe() {
                tasks.push(spawn_event_listener(
                    rx,
                    Arc::clone(&service.health),
                    service.backend_name.clone(),
                ));
            }
            if let Some(interval) = self.reconnect_interval {
                tasks.push(spawn_reconnect_probe(
                    Arc::clone(remote),
                    Arc::clone(&service.health),
                    service.backend_name.clone(),
                    interval,
                ));
            }
        }
        *service.tasks.lock().unwrap_or_else(|p| p.into_inner()) = tasks;
        service
    }
}

impl Default for CacheServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward connection lifecycle events into the health tracker.
fn spawn_event_listener(
    mut rx: broadcast::Receiver<ConnectionEvent>,
    health: Arc<HealthTracker>,
    backend: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                // Only a degraded backend is restored; running failure counts stay intact.
                Ok(ConnectionEvent::Connected) => {
                    if health.state(&backend) == HealthState::Degraded {
                        health.mark_healthy(&backend);
                    } else {
                        debug!(backend = %backend, "distributed tier connected");
                    }
                }
                // Command failures are already counted on the operation path.
                Ok(ConnectionEvent::Error(reason)) => {
                    debug!(backend = %backend, reason = %reason, "distributed tier connection error")
                }
                Ok(ConnectionEvent::Closed) => health.mark_degraded(&backend, "connection closed"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "connection event listener lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// While the backend is degraded, `PING` it; a reply is the success that restores it.
fn spawn_reconnect_probe(
    remote: Arc<dyn RemoteStore>,
    health: Arc<HealthTracker>,
    backend: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if health.state(&backend) != HealthState::Degraded {
                continue;
            }
            match remote.ping().await {
                Ok(()) => health.record_success(&backend),
                Err(e) => debug!(backend = %backend, error = %e, "reconnect probe failed"),
            }
        }
    })
}

/// Dual-tier cache: a distributed tier guarded by health tracking, with a
/// local tier that receives every write and serves whenever the distributed
/// tier cannot.
///
/// Construct one per process and share it by `Arc`.
pub struct CacheService {
    registry: NamespaceRegistry,
    local: Arc<LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    backend_name: String,
    health: Arc<HealthTracker>,
    stats: AtomicStats,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheService {
    pub fn builder() -> CacheServiceBuilder {
        CacheServiceBuilder::new()
    }

    /// Local-only service with the default namespace table.
    pub fn local() -> Self {
        CacheServiceBuilder::new().build()
    }

    /// Wire a service from settings.
    ///
    /// An unreachable Redis server does not fail construction: the service
    /// starts degraded and the reconnect probe restores it.
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self> {
        settings.validate()?;
        let mut builder = CacheServiceBuilder::new()
            .with_registry(settings.registry())
            .with_backend_name(settings.backend_name.clone())
            .with_health_config(
                HealthConfig::new().with_failure_threshold(settings.failure_threshold),
            )
            .with_sweep_interval(settings.sweep_interval());
        let mut unreachable = None;
        if let Some(redis_cfg) = settings.redis_config() {
            let store = RedisStore::new(&redis_cfg)?;
            match store.ping().await {
                Ok(()) => info!(url = %redis_cfg.url, "distributed tier connected"),
                Err(e) => {
                    warn!(url = %redis_cfg.url, error = %e, "distributed tier unreachable, starting degraded");
                    unreachable = Some(e.to_string());
                }
            }
            builder = builder.with_remote(Arc::new(store));
        } else {
            info!("no redis_url configured, running local-only");
        }
        let service = builder.build();
        match unreachable {
            Some(reason) => service.health.mark_degraded(&service.backend_name, &reason),
            None if service.remote.is_some() => service.health.mark_healthy(&service.backend_name),
            None => {}
        }
        Ok(service)
    }

    fn tier(&self, cfg: &NamespaceConfig) -> Tier<'_> {
        match self.remote {
            Some(ref remote) if cfg.use_distributed_tier => {
                if self.health.is_usable(&self.backend_name) {
                    Tier::Remote(remote)
                } else {
                    Tier::Degraded
                }
            }
            _ => Tier::LocalOnly,
        }
    }

    fn remote_for(&self, cfg: &NamespaceConfig) -> Option<&Arc<dyn RemoteStore>> {
        match self.tier(cfg) {
            Tier::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    fn remote_ok(&self) {
        self.health.record_success(&self.backend_name);
    }

    /// Count a failed distributed-tier call. Only connectivity errors count
    /// against backend health; a rejected command means the server answered.
    fn remote_failed(&self, op: &'static str, key: &str, err: &Error) {
        AtomicStats::bump(&self.stats.errors);
        AtomicStats::bump(&self.stats.distributed_fallbacks);
        if err.is_connectivity() {
            warn!(op, key = %key, error = %err, "distributed tier failed, falling back to local tier");
            self.health.record_failure(&self.backend_name, &err.to_string());
        } else {
            warn!(op, key = %key, error = %err, "distributed tier rejected command, falling back to local tier");
        }
    }

    /// Whether writes to this namespace are meant to reach the distributed tier.
    fn is_shared(&self, cfg: &NamespaceConfig) -> bool {
        self.remote.is_some() && cfg.use_distributed_tier
    }

    /// Push an entry written while the distributed tier was unreachable. It is
    /// this process's latest write for the key, so it replaces the shared copy.
    async fn replicate_pending(
        &self,
        remote: &Arc<dyn RemoteStore>,
        ns: &str,
        key: &str,
        held: &str,
        remaining: Duration,
    ) {
        let qualified = CacheKey::new(ns, key).qualified();
        match remote.set_ex(&qualified, held, remaining).await {
            Ok(()) => {
                self.remote_ok();
                debug!(key = %qualified, "replicated entry written while degraded");
            }
            Err(e) => {
                self.remote_failed("set", &qualified, &e);
                self.local.mark_pending(ns, key);
            }
        }
    }

    /// A counter key holding a non-integer payload is deleted so the count restarts.
    async fn discard_non_integer(&self, remote: &Arc<dyn RemoteStore>, qualified: &str) -> bool {
        warn!(key = %qualified, "discarding non-integer value under counter key");
        AtomicStats::bump(&self.stats.errors);
        match remote.del(&[qualified.to_string()]).await {
            Ok(_) => true,
            Err(e) => {
                self.remote_failed("del", qualified, &e);
                false
            }
        }
    }

    /// Fold a counter advanced locally while degraded into the distributed count.
    ///
    /// `rearm` is the expiry to apply; `None` keeps the local window. Returns
    /// the merged count and expiry when the local count was ahead.
    async fn fold_pending_counter(
        &self,
        remote: &Arc<dyn RemoteStore>,
        ns: &str,
        key: &str,
        counted: i64,
        rearm: Option<Duration>,
        max_entries: usize,
    ) -> Option<(i64, Duration)> {
        let (held, remaining) = self.local.take_pending(ns, key)?;
        let merged = held.trim().parse::<i64>().ok()?.saturating_add(1);
        if merged <= counted {
            return None;
        }
        let expiry = rearm.unwrap_or(remaining);
        let qualified = CacheKey::new(ns, key).qualified();
        let replicated = match remote.set_ex(&qualified, &merged.to_string(), expiry).await {
            Ok(()) => {
                self.remote_ok();
                true
            }
            Err(e) => {
                self.remote_failed("set", &qualified, &e);
                false
            }
        };
        debug!(key = %qualified, counted, merged, "folded counter kept while degraded");
        self.local.set(ns, key, merged.to_string(), expiry, max_entries);
        if !replicated {
            self.local.mark_pending(ns, key);
        }
        Some((merged, expiry))
    }

    async fn discard_malformed(&self, ck: &CacheKey, err: &serde_json::Error) {
        warn!(key = %ck, error = %err, "discarding malformed cache entry");
        AtomicStats::bump(&self.stats.errors);
        self.local.delete(&ck.namespace, &ck.key);
        let cfg = self.registry.resolve(&ck.namespace);
        if let Some(remote) = self.remote_for(&cfg) {
            if let Err(e) = remote.del(&[ck.qualified()]).await {
                self.remote_failed("del", &ck.qualified(), &e);
            }
        }
    }

    pub(crate) async fn lookup<T: DeserializeOwned>(
        &self,
        ns: &str,
        key: &str,
        use_fallback: bool,
    ) -> Option<T> {
        let cfg = self.registry.resolve(ns);
        let ck = CacheKey::new(ns, key);
        if let Some(remote) = self.remote_for(&cfg) {
            if let Some((held, remaining)) = self.local.take_pending(ns, key) {
                self.replicate_pending(remote, ns, key, &held, remaining).await;
            }
            match remote.get(&ck.qualified()).await {
                Ok(Some(raw)) => {
                    self.remote_ok();
                    match serde_json::from_str(&raw) {
                        Ok(v) => {
                            AtomicStats::bump(&self.stats.hits);
                            AtomicStats::bump(&self.stats.distributed_hits);
                            debug!(key = %ck, "cache hit (distributed)");
                            return Some(v);
                        }
                        Err(e) => {
                            self.discard_malformed(&ck, &e).await;
                            AtomicStats::bump(&self.stats.misses);
                            return None;
                        }
                    }
                }
                Ok(None) => self.remote_ok(),
                Err(e) => self.remote_failed("get", &ck.qualified(), &e),
            }
        }
        if let Some(raw) = self.local.get(ns, key) {
            match serde_json::from_str(&raw) {
                Ok(v) => {
                    AtomicStats::bump(&self.stats.hits);
                    AtomicStats::bump(&self.stats.local_hits);
                    debug!(key = %ck, "cache hit (local)");
                    return Some(v);
                }
                Err(e) => self.discard_malformed(&ck, &e).await,
            }
        }
        AtomicStats::bump(&self.stats.misses);
        debug!(key = %ck, "cache miss");
        if use_fallback && matches!(self.tier(&cfg), Tier::Degraded) {
            let placeholder = self.health.invoke_fallback(&self.backend_name)?;
            return serde_json::from_value(placeholder).ok();
        }
        None
    }

    /// Read a value. Returns `None` on a miss; never fails.
    ///
    /// When the distributed tier is degraded and nothing is cached locally,
    /// the registered fallback (if any) supplies a placeholder.
    pub async fn get<T: DeserializeOwned>(&self, ns: &str, key: &str) -> Option<T> {
        self.lookup(ns, key, true).await
    }

    /// Write to the distributed tier (when in use) and always to the local tier.
    ///
    /// `ttl` overrides the namespace default. Only a value that cannot be
    /// serialized is an error; distributed-tier trouble shows up in the outcome.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        ns: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<WriteOutcome> {
        let raw = serde_json::to_string(value)?;
        let cfg = self.registry.resolve(ns);
        let ttl = ttl.unwrap_or_else(|| cfg.ttl());
        let qualified = CacheKey::new(ns, key).qualified();
        let outcome = match self.tier(&cfg) {
            Tier::Remote(remote) => match remote.set_ex(&qualified, &raw, ttl).await {
                Ok(()) => {
                    self.remote_ok();
                    WriteOutcome::Replicated
                }
                Err(e) => {
                    self.remote_failed("set", &qualified, &e);
                    WriteOutcome::RemoteFailed
                }
            },
            Tier::LocalOnly => WriteOutcome::LocalOnly,
            Tier::Degraded => WriteOutcome::Degraded,
        };
        self.local.set(ns, key, raw, ttl, cfg.max_local_entries);
        if matches!(outcome, WriteOutcome::Degraded | WriteOutcome::RemoteFailed) {
            self.local.mark_pending(ns, key);
        }
        AtomicStats::bump(&self.stats.writes);
        debug!(key = %qualified, ttl_secs = ttl.as_secs(), ?outcome, "cache set");
        Ok(outcome)
    }

    /// Remove a key from both tiers. Returns whether either tier held it.
    pub async fn delete(&self, ns: &str, key: &str) -> bool {
        let (remote_removed, local_removed) = self.delete_tiers(ns, key).await;
        let removed = remote_removed.unwrap_or(false) || local_removed.is_some();
        if removed {
            AtomicStats::bump(&self.stats.deletes);
        }
        removed
    }

    /// Delete from both tiers. The first element is `None` when the distributed
    /// tier was not reached; the second is `Some(pending)` when the local tier held the key.
    async fn delete_tiers(&self, ns: &str, key: &str) -> (Option<bool>, Option<bool>) {
        let cfg = self.registry.resolve(ns);
        let qualified = CacheKey::new(ns, key).qualified();
        let mut remote_removed = None;
        if let Some(remote) = self.remote_for(&cfg) {
            match remote.del(&[qualified.clone()]).await {
                Ok(n) => {
                    self.remote_ok();
                    remote_removed = Some(n > 0);
                }
                Err(e) => self.remote_failed("del", &qualified, &e),
            }
        }
        (remote_removed, self.local.remove(ns, key))
    }

    /// Delete and report whether *this* call removed the key.
    ///
    /// With a reachable distributed tier its `DEL` count decides, so across
    /// processes exactly one caller claims a given key. An entry only this
    /// process ever held (written while degraded) is claimed by its local delete.
    pub(crate) async fn claim(&self, ns: &str, key: &str) -> bool {
        let claimed = match self.delete_tiers(ns, key).await {
            (Some(true), _) => true,
            (Some(false), local) => local == Some(true),
            (None, local) => local.is_some(),
        };
        if claimed {
            AtomicStats::bump(&self.stats.deletes);
        }
        claimed
    }

    pub async fn has(&self, ns: &str, key: &str) -> bool {
        let cfg = self.registry.resolve(ns);
        if let Some(remote) = self.remote_for(&cfg) {
            let qualified = CacheKey::new(ns, key).qualified();
            match remote.get(&qualified).await {
                Ok(found) => {
                    self.remote_ok();
                    if found.is_some() {
                        return true;
                    }
                }
                Err(e) => self.remote_failed("get", &qualified, &e),
            }
        }
        self.local.contains(ns, key)
    }

    /// Return the cached value, or run `factory` once, cache its result and return it.
    ///
    /// Factory errors are returned unchanged and nothing is cached. Concurrent
    /// misses on the same key each run their own factory.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        ns: &str,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(v) = self.lookup(ns, key, false).await {
            return Ok(v);
        }
        let value = factory().await?;
        if let Err(e) = self.set(ns, key, &value, ttl).await {
            warn!(namespace = ns, key, error = %e, "computed value could not be cached");
        }
        Ok(value)
    }

    /// Atomically add one, re-arming the expiry on every call.
    pub async fn increment(&self, ns: &str, key: &str, ttl: Option<Duration>) -> i64 {
        let cfg = self.registry.resolve(ns);
        let ttl = ttl.unwrap_or_else(|| cfg.ttl());
        AtomicStats::bump(&self.stats.writes);
        if let Some(remote) = self.remote_for(&cfg) {
            let qualified = CacheKey::new(ns, key).qualified();
            let mut counted = remote.incr_expire(&qualified, ttl).await;
            let rejected = matches!(&counted, Err(e) if e.is_rejected());
            if rejected && self.discard_non_integer(remote, &qualified).await {
                counted = remote.incr_expire(&qualified, ttl).await;
            }
            match counted {
                Ok(n) => {
                    self.remote_ok();
                    if let Some((merged, _)) = self
                        .fold_pending_counter(remote, ns, key, n, Some(ttl), cfg.max_local_entries)
                        .await
                    {
                        return merged;
                    }
                    self.local.set(ns, key, n.to_string(), ttl, cfg.max_local_entries);
                    return n;
                }
                Err(e) => self.remote_failed("incr", &qualified, &e),
            }
        }
        let n = self.local.increment(ns, key, ttl, true, cfg.max_local_entries);
        if self.is_shared(&cfg) {
            self.local.mark_pending(ns, key);
        }
        n
    }

    /// Fixed-window counter: add one, arming `window` only when the counter is new.
    /// Returns the count and the time until the window resets.
    pub(crate) async fn increment_window(&self, ns: &str, key: &str, window: Duration) -> (i64, Duration) {
        let cfg = self.registry.resolve(ns);
        AtomicStats::bump(&self.stats.writes);
        if let Some(remote) = self.remote_for(&cfg) {
            let qualified = CacheKey::new(ns, key).qualified();
            let mut counted = remote.incr_window(&qualified, window).await;
            let rejected = matches!(&counted, Err(e) if e.is_rejected());
            if rejected && self.discard_non_integer(remote, &qualified).await {
                counted = remote.incr_window(&qualified, window).await;
            }
            match counted {
                Ok((n, reset_in)) => {
                    self.remote_ok();
                    if let Some(merged) = self
                        .fold_pending_counter(remote, ns, key, n, None, cfg.max_local_entries)
                        .await
                    {
                        return merged;
                    }
                    self.local.set(ns, key, n.to_string(), reset_in, cfg.max_local_entries);
                    return (n, reset_in);
                }
                Err(e) => self.remote_failed("incr", &qualified, &e),
            }
        }
        let n = self.local.increment(ns, key, window, false, cfg.max_local_entries);
        if self.is_shared(&cfg) {
            self.local.mark_pending(ns, key);
        }
        let reset_in = self.local.remaining_ttl(ns, key).unwrap_or(window);
        (n, reset_in)
    }

    /// Store only if absent. Atomic on the distributed tier (`SET NX EX`) and
    /// under the namespace lock on the local fallback.
    pub async fn set_if_absent<T: Serialize + ?Sized>(
        &self,
        ns: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let raw = serde_json::to_string(value)?;
        let cfg = self.registry.resolve(ns);
        let ttl = ttl.unwrap_or_else(|| cfg.ttl());
        if let Some(remote) = self.remote_for(&cfg) {
            if let Some((held, remaining)) = self.local.take_pending(ns, key) {
                // Stored locally while degraded: the key is taken.
                self.replicate_pending(remote, ns, key, &held, remaining).await;
                return Ok(false);
            }
            let qualified = CacheKey::new(ns, key).qualified();
            match remote.set_nx_ex(&qualified, &raw, ttl).await {
                Ok(stored) => {
                    self.remote_ok();
                    if stored {
                        AtomicStats::bump(&self.stats.writes);
                        self.local.set(ns, key, raw, ttl, cfg.max_local_entries);
                    }
                    return Ok(stored);
                }
                Err(e) => self.remote_failed("set_nx", &qualified, &e),
            }
        }
        let stored = self
            .local
            .set_if_absent(ns, key, raw, ttl, cfg.max_local_entries);
        if stored {
            AtomicStats::bump(&self.stats.writes);
            if self.is_shared(&cfg) {
                self.local.mark_pending(ns, key);
            }
        }
        Ok(stored)
    }

    /// Remaining lifetime of a key.
    pub async fn remaining_ttl(&self, ns: &str, key: &str) -> Option<Duration> {
        let cfg = self.registry.resolve(ns);
        if let Some(remote) = self.remote_for(&cfg) {
            let qualified = CacheKey::new(ns, key).qualified();
            match remote.ttl(&qualified).await {
                Ok(ttl) => {
                    self.remote_ok();
                    return ttl;
                }
                Err(e) => self.remote_failed("ttl", &qualified, &e),
            }
        }
        self.local.remaining_ttl(ns, key)
    }

    /// Unqualified keys present in a namespace across both tiers.
    pub async fn scan_keys(&self, ns: &str) -> Vec<String> {
        let cfg = self.registry.resolve(ns);
        let mut keys = self.local.keys(ns);
        if let Some(remote) = self.remote_for(&cfg) {
            match remote.scan(&CacheKey::namespace_pattern(ns)).await {
                Ok(found) => {
                    self.remote_ok();
                    keys.extend(found.iter().filter_map(|q| CacheKey::parse(q)).map(|k| k.key));
                }
                Err(e) => self.remote_failed("scan", &CacheKey::namespace_pattern(ns), &e),
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }

    /// Drop every key of a namespace from both tiers. Returns entries removed across tiers.
    pub async fn clear_namespace(&self, ns: &str) -> u64 {
        let cfg = self.registry.resolve(ns);
        let mut removed = 0;
        if let Some(remote) = self.remote_for(&cfg) {
            let pattern = CacheKey::namespace_pattern(ns);
            let deleted = match remote.scan(&pattern).await {
                Ok(keys) => remote.del(&keys).await,
                Err(e) => Err(e),
            };
            match deleted {
                Ok(n) => {
                    self.remote_ok();
                    removed += n;
                }
                Err(e) => self.remote_failed("clear", &pattern, &e),
            }
        }
        removed += self.local.clear_namespace(ns) as u64;
        info!(namespace = ns, removed, "cleared cache namespace");
        removed
    }

    /// Register or replace a namespace at runtime.
    ///
    /// Fails for names that are empty or contain `:` or glob metacharacters,
    /// and for a zero TTL or capacity.
    pub fn register_namespace(&self, name: impl Into<String>, config: NamespaceConfig) -> Result<()> {
        let name = name.into();
        validate_namespace(&name, &config)?;
        info!(
            namespace = %name,
            ttl_secs = config.ttl_seconds,
            max_local_entries = config.max_local_entries,
            distributed = config.use_distributed_tier,
            "registered cache namespace"
        );
        self.registry.register(name, config);
        Ok(())
    }

    pub fn namespace_config(&self, name: &str) -> NamespaceConfig {
        self.registry.resolve(name)
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn backend_state(&self) -> HealthState {
        if self.remote.is_none() {
            return HealthState::Unknown;
        }
        self.health.state(&self.backend_name)
    }

    /// Register the placeholder producer used when the distributed tier is degraded.
    pub fn register_fallback(&self, f: FallbackFn) {
        self.health.register_fallback(&self.backend_name, f);
    }

    pub fn stats(&self) -> CacheStats {
        let [hits, misses, writes, deletes, errors, distributed_hits, local_hits, distributed_fallbacks] =
            self.stats.counters();
        let backend_state = self.backend_state();
        CacheStats {
            hits,
            misses,
            writes,
            deletes,
            errors,
            distributed_hits,
            local_hits,
            distributed_fallbacks,
            backend: self.remote.as_ref().map(|r| r.name()),
            backend_state,
            backend_connected: self.remote.is_some() && backend_state.is_usable(),
            namespaces: self.registry.names(),
            local_entries: self.local.len(),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Stop background tasks and close the distributed tier.
    pub async fn shutdown(&self) {
        self.abort_tasks();
        if let Some(ref remote) = self.remote {
            remote.close().await;
        }
        info!("cache service shut down");
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        for t in tasks.drain(..) {
            t.abort();
        }
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
