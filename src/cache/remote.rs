//! Distributed tier seam.
//!
//! [`RemoteStore`] mirrors the Redis command subset the cache needs. The
//! adapter holds no retry or health policy; the [`CacheService`](super::CacheService)
//! owns all resilience decisions.

use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Connection lifecycle transitions published by a remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Error(String),
    Closed,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// `SETEX key ttl value`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// `DEL key...`; returns how many keys were removed.
    async fn del(&self, keys: &[String]) -> Result<u64>;
    /// `INCR key` + `EXPIRE key ttl` as one atomic pipeline.
    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64>;
    /// `INCR key`, arming `EXPIRE key window` only when the counter has no expiry yet.
    /// Returns the new count and the remaining window.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<(i64, Duration)>;
    /// `SET key value EX ttl NX`; true when the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    /// `TTL key`; `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    /// `SCAN` with `MATCH pattern` until the cursor wraps.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;
    /// `PING`
    async fn ping(&self) -> Result<()>;
    /// Release connections and publish [`ConnectionEvent::Closed`].
    async fn close(&self) {}
    /// Connection events, when the store publishes any.
    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectionEvent>> {
        None
    }
    fn name(&self) -> &'static str;
}

/// Seconds for `EX`/`EXPIRE`: Redis rejects 0, so round up to at least one.
pub(crate) fn expire_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| now < t)
    }
}

/// In-memory [`RemoteStore`] with Redis semantics, for tests and local development.
///
/// Every command takes one mutex, so pipelines are atomic just like on the
/// backend. Failures can be injected to simulate an outage.
pub struct MemoryRemote {
    data: Mutex<HashMap<String, StoredValue>>,
    fail_next: AtomicU32,
    fail_all: std::sync::atomic::AtomicBool,
    calls: AtomicU32,
    events: broadcast::Sender<ConnectionEvent>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            data: Mutex::new(HashMap::new()),
            fail_next: AtomicU32::new(0),
            fail_all: std::sync::atomic::AtomicBool::new(false),
            calls: AtomicU32::new(0),
            events,
        }
    }

    /// Fail the next `n` commands with a connection error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every command until switched off.
    pub fn set_unavailable(&self, down: bool) {
        self.fail_all.store(down, Ordering::SeqCst);
        let event = if down {
            ConnectionEvent::Error("simulated outage".into())
        } else {
            ConnectionEvent::Connected
        };
        let _ = self.events.send(event);
    }

    /// Publish an arbitrary connection event.
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    /// Number of commands received, including failed ones.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw stored value, bypassing failure injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        let data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        data.get(key)
            .filter(|v| v.live(Instant::now()))
            .map(|v| v.value.clone())
    }

    fn check(&self, command: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::backend_with_context(
                "connection refused",
                ErrorContext::new()
                    .with_source("memory_remote")
                    .with_details(command.to_string()),
            ));
        }
        Ok(())
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut HashMap<String, StoredValue>, Instant) -> T) -> T {
        let mut data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        data.retain(|_, v| v.live(now));
        f(&mut data, now)
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob match supporting `*` and `?`, enough for `SCAN MATCH` patterns.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let (mut star, mut mark) = (None, 0);
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check("GET")?;
        Ok(self.with_data(|d, _| d.get(key).map(|v| v.value.clone())))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check("SETEX")?;
        let ttl = Duration::from_secs(expire_secs(ttl));
        self.with_data(|d, now| {
            d.insert(
                key.to_string(),
                StoredValue {
                    value: value.to_string(),
                    expires_at: Some(now + ttl),
                },
            );
        });
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check("DEL")?;
        Ok(self.with_data(|d, _| keys.iter().filter(|k| d.remove(k.as_str()).is_some()).count() as u64))
    }

    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.check("MULTI INCR EXPIRE")?;
        let ttl = Duration::from_secs(expire_secs(ttl));
        self.with_data(|d, now| {
            let entry = d.entry(key.to_string()).or_insert(StoredValue {
                value: "0".into(),
                expires_at: None,
            });
            let current: i64 = entry.value.parse().map_err(|_| {
                Error::rejected_with_context(
                    "value is not an integer or out of range",
                    ErrorContext::new().with_source("memory_remote"),
                )
            })?;
            let next = current + 1;
            entry.value = next.to_string();
            entry.expires_at = Some(now + ttl);
            Ok(next)
        })
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<(i64, Duration)> {
        self.check("MULTI INCR TTL")?;
        let window = Duration::from_secs(expire_secs(window));
        self.with_data(|d, now| {
            let entry = d.entry(key.to_string()).or_insert(StoredValue {
                value: "0".into(),
                expires_at: None,
            });
            let current: i64 = entry.value.parse().map_err(|_| {
                Error::rejected_with_context(
                    "value is not an integer or out of range",
                    ErrorContext::new().with_source("memory_remote"),
                )
            })?;
            let next = current + 1;
            entry.value = next.to_string();
            let expires_at = *entry.expires_at.get_or_insert(now + window);
            Ok((next, expires_at.saturating_duration_since(now)))
        })
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check("SET NX EX")?;
        let ttl = Duration::from_secs(expire_secs(ttl));
        Ok(self.with_data(|d, now| {
            if d.contains_key(key) {
                return false;
            }
            d.insert(
                key.to_string(),
                StoredValue {
                    value: value.to_string(),
                    expires_at: Some(now + ttl),
                },
            );
            true
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check("TTL")?;
        Ok(self.with_data(|d, now| {
            d.get(key)
                .and_then(|v| v.expires_at)
                .map(|t| t.saturating_duration_since(now))
        }))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        self.check("SCAN")?;
        Ok(self.with_data(|d, _| {
            d.keys()
                .filter(|k| glob_match(pattern, k))
                .cloned()
                .collect()
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.check("PING")
    }

    async fn close(&self) {
        let _ = self.events.send(ConnectionEvent::Closed);
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectionEvent>> {
        Some(self.events.subscribe())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
