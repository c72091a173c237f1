//! Redis-backed distributed tier.

use super::remote::{expire_secs, ConnectionEvent, RemoteStore};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Pool, PoolConfig, Runtime, Timeouts};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

const SCAN_COUNT: usize = 100;

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
    /// Bound on acquiring/creating/recycling a pooled connection.
    pub connect_timeout: Duration,
    /// Bound on a single command round trip.
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// [`RemoteStore`] over a `deadpool-redis` pool.
///
/// Publishes `Connected` when a connection is obtained after a failure (or
/// for the first time) and `Error` when the pool or a command fails.
pub struct RedisStore {
    pool: Pool,
    command_timeout: Duration,
    connected: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
}

impl RedisStore {
    /// Build the pool. No connection is attempted until the first command.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let mut cfg = deadpool_redis::Config::from_url(&config.url);
        cfg.pool = Some(PoolConfig {
            max_size: config.pool_size.max(1),
            timeouts: Timeouts {
                wait: Some(config.connect_timeout),
                create: Some(config.connect_timeout),
                recycle: Some(config.connect_timeout),
            },
            ..Default::default()
        });
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to create Redis pool: {}", e),
                ErrorContext::new()
                    .with_field_path("redis_url")
                    .with_source("redis"),
            )
        })?;
        let (events, _) = broadcast::channel(32);
        Ok(Self {
            pool,
            command_timeout: config.command_timeout,
            connected: AtomicBool::new(false),
            events,
        })
    }

    /// Build the pool and verify the server answers `PING`.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.ping().await?;
        tracing::info!(url = %config.url, "connected to Redis");
        Ok(store)
    }

    /// Report a failure to subscribers. Only a failed checkout marks the store
    /// disconnected, so `Connected` follows a real reconnect and never a bad command.
    fn note_failure(&self, err: &Error, checkout: bool) {
        if checkout {
            self.connected.store(false, Ordering::SeqCst);
        }
        let _ = self.events.send(ConnectionEvent::Error(err.to_string()));
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        match self.pool.get().await {
            Ok(conn) => {
                if !self.connected.swap(true, Ordering::SeqCst) {
                    let _ = self.events.send(ConnectionEvent::Connected);
                }
                Ok(conn)
            }
            Err(e) => {
                let err = Error::from(e);
                self.note_failure(&err, true);
                Err(err)
            }
        }
    }

    /// Run one command against a pooled connection under the command timeout.
    async fn run<T, F, Fut>(&self, command: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(deadpool_redis::Connection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.conn().await?;
        let result = match tokio::time::timeout(self.command_timeout, f(conn)).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::Timeout {
                elapsed_ms: self.command_timeout.as_millis() as u64,
                context: ErrorContext::new()
                    .with_source("redis")
                    .with_details(command),
            }),
        };
        if let Err(ref e) = result {
            tracing::debug!(command, error = %e, "Redis command failed");
            if e.is_connectivity() {
                self.note_failure(e, false);
            }
        }
        result
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run("GET", |mut conn| async move { conn.get(key).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let secs = expire_secs(ttl);
        self.run("SETEX", |mut conn| async move {
            conn.set_ex::<_, _, ()>(key, value, secs).await
        })
        .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = keys.to_vec();
        self.run("DEL", |mut conn| async move { conn.del(keys).await })
            .await
    }

    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64> {
        let secs = expire_secs(ttl) as i64;
        self.run("MULTI INCR EXPIRE", |mut conn| async move {
            let (count, _armed): (i64, i64) = redis::pipe()
                .atomic()
                .incr(key, 1)
                .expire(key, secs)
                .query_async(&mut conn)
                .await?;
            Ok(count)
        })
        .await
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<(i64, Duration)> {
        let secs = expire_secs(window);
        self.run("MULTI INCR TTL", |mut conn| async move {
            let (count, ttl): (i64, i64) = redis::pipe()
                .atomic()
                .incr(key, 1)
                .ttl(key)
                .query_async(&mut conn)
                .await?;
            // -1: no expiry yet. Either this call created the counter or an
            // earlier arming step was lost; arm the window now.
            if ttl < 0 {
                conn.expire::<_, ()>(key, secs as i64).await?;
                return Ok((count, Duration::from_secs(secs)));
            }
            Ok((count, Duration::from_secs(ttl as u64)))
        })
        .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let secs = expire_secs(ttl);
        self.run("SET NX EX", |mut conn| async move {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .arg("NX")
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.run("TTL", |mut conn| async move {
            let secs: i64 = conn.ttl(key).await?;
            Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
        })
        .await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        self.run("SCAN", |mut conn| async move {
            let mut cursor: u64 = 0;
            let mut found = Vec::new();
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await?;
                found.extend(keys);
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
            // SCAN may return a key more than once across iterations.
            found.sort();
            found.dedup();
            Ok(found)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.run("PING", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        self.pool.close();
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Closed);
        tracing::info!("Redis pool closed");
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectionEvent>> {
        Some(self.events.subscribe())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
