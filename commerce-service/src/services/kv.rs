//! Shared KV backing for the rate limiters and the failed-login tracker.
//!
//! One trait, two implementations: Redis for distributed state, an
//! in-process map as the fallback. The `DegradingKvStore` wrapper prefers
//! Redis and downgrades to memory after a bounded failure budget, probing
//! periodically to restore distributed mode. Which mode is active is
//! surfaced by the health endpoint.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Consecutive Redis failures tolerated before downgrading to memory.
const FAILURE_BUDGET: u32 = 3;

/// How often the degraded wrapper probes Redis for recovery.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// How often the in-memory store sweeps expired entries.
const EVICTION_INTERVAL: Duration = Duration::from_secs(300);

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increment a windowed counter. Returns the new count and
    /// the remaining window in seconds. The first increment opens the
    /// window.
    async fn incr_window(&self, key: &str, window_secs: u64) -> Result<(u64, u64), anyhow::Error>;

    /// Set a flag with a TTL (used for blocks).
    async fn set_flag(&self, key: &str, ttl_secs: u64) -> Result<(), anyhow::Error>;

    /// Current value of a windowed counter without touching it.
    async fn get_counter(&self, key: &str) -> Result<u64, anyhow::Error>;

    /// Remaining TTL of a flag in seconds, if the flag is present.
    async fn flag_ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error>;

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;

    async fn ping(&self) -> Result<(), anyhow::Error>;
}

/// Redis-backed store. Counter atomicity comes from INCR.
#[derive(Clone)]
pub struct RedisKvStore {
    manager: ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        tracing::info!("Successfully connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn incr_window(&self, key: &str, window_secs: u64) -> Result<(u64, u64), anyhow::Error> {
        let mut conn = self.manager.clone();

        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await?;
            return Ok((count, window_secs));
        }

        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        if ttl < 0 {
            // Key lost its expiry (e.g. a crash between INCR and EXPIRE);
            // re-arm the window rather than leaking a permanent counter.
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await?;
            return Ok((count, window_secs));
        }

        Ok((count, ttl as u64))
    }

    async fn get_counter(&self, key: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let value: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_flag(&self, key: &str, ttl_secs: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn flag_ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        if ttl > 0 {
            Ok(Some(ttl as u64))
        } else {
            Ok(None)
        }
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// In-process store. Per-key atomicity comes from the map's entry lock, so
/// bursting cannot skip past thresholds.
#[derive(Default)]
pub struct MemoryKvStore {
    counters: DashMap<String, CounterEntry>,
    flags: DashMap<String, Instant>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired entries.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.counters.retain(|_, entry| entry.expires_at > now);
        self.flags.retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn incr_window(&self, key: &str, window_secs: u64) -> Result<(u64, u64), anyhow::Error> {
        let now = Instant::now();
        let window = Duration::from_secs(window_secs);

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                count: 0,
                expires_at: now + window,
            });

        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
        }
        entry.count += 1;

        let ttl = entry
            .expires_at
            .saturating_duration_since(now)
            .as_secs()
            .max(1);
        Ok((entry.count, ttl))
    }

    async fn get_counter(&self, key: &str) -> Result<u64, anyhow::Error> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn set_flag(&self, key: &str, ttl_secs: u64) -> Result<(), anyhow::Error> {
        self.flags.insert(
            key.to_string(),
            Instant::now() + Duration::from_secs(ttl_secs),
        );
        Ok(())
    }

    async fn flag_ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        let now = Instant::now();
        if let Some(expires_at) = self.flags.get(key).map(|e| *e.value()) {
            if expires_at > now {
                return Ok(Some((expires_at - now).as_secs().max(1)));
            }
            self.flags.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.counters.remove(key);
        self.flags.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Prefers Redis, degrades to the in-process map when the failure budget is
/// exhausted, and probes for recovery in the background.
pub struct DegradingKvStore {
    redis: Option<RedisKvStore>,
    memory: MemoryKvStore,
    failures: AtomicU32,
    degraded: AtomicBool,
}

impl DegradingKvStore {
    pub fn new(redis: Option<RedisKvStore>) -> Self {
        Self {
            redis,
            memory: MemoryKvStore::new(),
            failures: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the distributed backend is currently serving.
    pub fn is_distributed(&self) -> bool {
        self.redis.is_some() && !self.degraded.load(Ordering::Relaxed)
    }

    fn active_redis(&self) -> Option<&RedisKvStore> {
        if self.degraded.load(Ordering::Relaxed) {
            None
        } else {
            self.redis.as_ref()
        }
    }

    fn record_failure(&self, err: &anyhow::Error) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(error = %err, failures, "Redis operation failed");
        if failures >= FAILURE_BUDGET && !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::error!("Redis failure budget exhausted; downgrading to in-memory store");
        }
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    /// Background maintenance: evict expired in-memory entries and probe
    /// Redis for recovery while degraded.
    pub fn spawn_maintenance(store: Arc<Self>) {
        {
            let store = store.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(EVICTION_INTERVAL);
                loop {
                    interval.tick().await;
                    store.memory.evict_expired();
                }
            });
        }

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROBE_INTERVAL);
            loop {
                interval.tick().await;
                if !store.degraded.load(Ordering::Relaxed) {
                    continue;
                }
                if let Some(redis) = store.redis.as_ref() {
                    if redis.ping().await.is_ok() {
                        store.failures.store(0, Ordering::Relaxed);
                        store.degraded.store(false, Ordering::Relaxed);
                        tracing::info!("Redis recovered; distributed store restored");
                    }
                }
            }
        });
    }
}

macro_rules! degrade {
    ($self:ident, $call:ident ( $($arg:expr),* )) => {{
        if let Some(redis) = $self.active_redis() {
            match redis.$call($($arg),*).await {
                Ok(value) => {
                    $self.record_success();
                    return Ok(value);
                }
                Err(err) => $self.record_failure(&err),
            }
        }
        $self.memory.$call($($arg),*).await
    }};
}

#[async_trait]
impl KvStore for DegradingKvStore {
    async fn incr_window(&self, key: &str, window_secs: u64) -> Result<(u64, u64), anyhow::Error> {
        degrade!(self, incr_window(key, window_secs))
    }

    async fn get_counter(&self, key: &str) -> Result<u64, anyhow::Error> {
        degrade!(self, get_counter(key))
    }

    async fn set_flag(&self, key: &str, ttl_secs: u64) -> Result<(), anyhow::Error> {
        degrade!(self, set_flag(key, ttl_secs))
    }

    async fn flag_ttl(&self, key: &str) -> Result<Option<u64>, anyhow::Error> {
        degrade!(self, flag_ttl(key))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        degrade!(self, delete(key))
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        degrade!(self, ping())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_counter_increments_within_window() {
        let store = MemoryKvStore::new();
        let (count, ttl) = store.incr_window("k", 60).await.unwrap();
        assert_eq!(count, 1);
        assert!(ttl <= 60 && ttl >= 59);

        let (count, _) = store.incr_window("k", 60).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn memory_counter_keys_are_independent() {
        let store = MemoryKvStore::new();
        store.incr_window("a", 60).await.unwrap();
        store.incr_window("a", 60).await.unwrap();
        let (count, _) = store.incr_window("b", 60).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn memory_flag_ttl_and_delete() {
        let store = MemoryKvStore::new();
        assert_eq!(store.flag_ttl("block").await.unwrap(), None);

        store.set_flag("block", 1800).await.unwrap();
        let ttl = store.flag_ttl("block").await.unwrap().unwrap();
        assert!(ttl > 1700 && ttl <= 1800);

        store.delete("block").await.unwrap();
        assert_eq!(store.flag_ttl("block").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryKvStore::new());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.incr_window("shared", 60).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let (count, _) = store.incr_window("shared", 60).await.unwrap();
        assert_eq!(count, 1001);
    }

    #[tokio::test]
    async fn eviction_removes_expired_entries() {
        let store = MemoryKvStore::new();
        store.incr_window("short", 1).await.unwrap();
        store.set_flag("flag", 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        store.evict_expired();
        assert!(store.counters.is_empty());
        assert!(store.flags.is_empty());
    }

    #[tokio::test]
    async fn degrading_store_without_redis_serves_from_memory() {
        let store = DegradingKvStore::new(None);
        assert!(!store.is_distributed());
        let (count, _) = store.incr_window("k", 60).await.unwrap();
        assert_eq!(count, 1);
    }
}
