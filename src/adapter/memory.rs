//! In-process reference service implementing every capability
//!
//! Used by tests and by the worker binary when no external system is wired
//! in. Latency can be simulated so timeout operations have something to
//! time out on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

use super::registry::Capabilities;
use super::traits::{
    AdapterError, ConnectionSettings, Expiry, Lifecycle, StrongCounter, StrongCounterOperations,
    TemporalCache, TemporalOperations, TimeoutCache, TimeoutOperations, Transaction, Transactional,
    WeakCounter, WeakCounterOperations,
};

const WEAK_COUNTER_STRIPES: usize = 8;

/// Configuration for [`MemoryService`]
#[derive(Debug, Clone)]
pub struct MemoryServiceConfig {
    /// Simulated latency added to every cache call (default: none)
    pub latency: Duration,
    /// Initial client socket timeout (default: 60s)
    pub socket_timeout: Duration,
}

impl Default for MemoryServiceConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            socket_timeout: Duration::from_secs(60),
        }
    }
}

impl MemoryServiceConfig {
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }
}

/// Shared running flag checked by every handle the service hands out
#[derive(Clone, Default)]
struct Running(Arc<AtomicBool>);

impl Running {
    fn check(&self) -> Result<(), AdapterError> {
        if self.0.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(AdapterError::NotRunning)
        }
    }
}

pub struct MemoryService {
    config: MemoryServiceConfig,
    running: Running,
    strong_counters: Mutex<HashMap<String, Arc<MemoryStrongCounter>>>,
    weak_counters: Mutex<HashMap<String, Arc<MemoryWeakCounter>>>,
    caches: Mutex<HashMap<String, Arc<MemoryCache>>>,
    socket_timeout_ms: AtomicU64,
    reconnects: AtomicU64,
}

impl MemoryService {
    pub fn new(config: MemoryServiceConfig) -> Arc<Self> {
        let socket_timeout_ms = config.socket_timeout.as_millis() as u64;
        Arc::new(Self {
            config,
            running: Running::default(),
            strong_counters: Mutex::new(HashMap::new()),
            weak_counters: Mutex::new(HashMap::new()),
            caches: Mutex::new(HashMap::new()),
            socket_timeout_ms: AtomicU64::new(socket_timeout_ms),
            reconnects: AtomicU64::new(0),
        })
    }

    /// Every capability of this service
    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities::new()
            .with_lifecycle(self.clone())
            .with_strong_counters(self.clone())
            .with_weak_counters(self.clone())
            .with_timeout_operations(self.clone())
            .with_temporal_operations(self.clone())
            .with_transactional(self.clone())
            .with_connection_settings(self.clone())
    }

    /// How many times the connections were reinitialized
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Acquire)
    }

    fn memory_cache(&self, name: &str) -> Arc<MemoryCache> {
        self.caches
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryCache {
                    running: self.running.clone(),
                    latency: self.config.latency,
                    entries: Mutex::new(HashMap::new()),
                })
            })
            .clone()
    }
}

#[async_trait]
impl Lifecycle for MemoryService {
    async fn start(&self) -> Result<(), AdapterError> {
        if !self.running.0.swap(true, Ordering::AcqRel) {
            info!("Memory service started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        if self.running.0.swap(false, Ordering::AcqRel) {
            info!("Memory service stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.0.load(Ordering::Acquire)
    }
}

impl StrongCounterOperations for MemoryService {
    fn strong_counter(&self, name: &str) -> Result<Arc<dyn StrongCounter>, AdapterError> {
        self.running.check()?;
        let counter = self
            .strong_counters
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryStrongCounter {
                    running: self.running.clone(),
                    value: AtomicI64::new(0),
                })
            })
            .clone();
        Ok(counter)
    }
}

impl WeakCounterOperations for MemoryService {
    fn weak_counter(&self, name: &str) -> Result<Arc<dyn WeakCounter>, AdapterError> {
        self.running.check()?;
        let counter = self
            .weak_counters
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryWeakCounter {
                    running: self.running.clone(),
                    stripes: (0..WEAK_COUNTER_STRIPES).map(|_| AtomicI64::new(0)).collect(),
                })
            })
            .clone();
        Ok(counter)
    }
}

impl TimeoutOperations for MemoryService {
    fn cache(&self, name: &str) -> Result<Arc<dyn TimeoutCache>, AdapterError> {
        self.running.check()?;
        Ok(self.memory_cache(name))
    }
}

impl TemporalOperations for MemoryService {
    fn cache(&self, name: &str) -> Result<Arc<dyn TemporalCache>, AdapterError> {
        self.running.check()?;
        Ok(self.memory_cache(name))
    }
}

#[async_trait]
impl Transactional for MemoryService {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AdapterError> {
        Ok(Box::new(MemoryTransaction))
    }
}

/// Transaction without isolation; commit and rollback are markers only
struct MemoryTransaction;

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[async_trait]
impl ConnectionSettings for MemoryService {
    fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms.load(Ordering::Acquire))
    }

    async fn reconfigure_socket_timeout(&self, timeout: Duration) -> Result<(), AdapterError> {
        self.running.check()?;
        self.socket_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Release);
        self.reconnects.fetch_add(1, Ordering::AcqRel);
        info!(socket_timeout = ?timeout, "Memory service connections reinitialized");
        Ok(())
    }
}

struct MemoryStrongCounter {
    running: Running,
    value: AtomicI64,
}

#[async_trait]
impl StrongCounter for MemoryStrongCounter {
    async fn increment_and_get(&self) -> Result<i64, AdapterError> {
        self.add_and_get(1).await
    }

    async fn decrement_and_get(&self) -> Result<i64, AdapterError> {
        self.add_and_get(-1).await
    }

    async fn add_and_get(&self, delta: i64) -> Result<i64, AdapterError> {
        self.running.check()?;
        Ok(self.value.fetch_add(delta, Ordering::AcqRel).wrapping_add(delta))
    }

    async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool, AdapterError> {
        self.running.check()?;
        Ok(self
            .value
            .compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn get_value(&self) -> Result<i64, AdapterError> {
        self.running.check()?;
        Ok(self.value.load(Ordering::Acquire))
    }

    async fn reset(&self) -> Result<(), AdapterError> {
        self.running.check()?;
        self.value.store(0, Ordering::Release);
        Ok(())
    }
}

/// Striped counter; reads sum the stripes and may miss in-flight adds
struct MemoryWeakCounter {
    running: Running,
    stripes: Vec<AtomicI64>,
}

#[async_trait]
impl WeakCounter for MemoryWeakCounter {
    async fn add(&self, delta: i64) -> Result<(), AdapterError> {
        self.running.check()?;
        let stripe = rand::random_range(0..self.stripes.len());
        self.stripes[stripe].fetch_add(delta, Ordering::Relaxed);
        Ok(())
    }

    async fn get_value(&self) -> Result<i64, AdapterError> {
        self.running.check()?;
        Ok(self.stripes.iter().map(|s| s.load(Ordering::Relaxed)).sum())
    }

    async fn reset(&self) -> Result<(), AdapterError> {
        self.running.check()?;
        for stripe in &self.stripes {
            stripe.store(0, Ordering::Relaxed);
        }
        Ok(())
    }
}

struct CacheEntry {
    value: Vec<u8>,
    created: Instant,
    last_access: Instant,
    expiry: Expiry,
}

impl CacheEntry {
    fn new(value: Vec<u8>, expiry: Expiry) -> Self {
        let now = Instant::now();
        Self {
            value,
            created: now,
            last_access: now,
            expiry,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        let lifespan_over = self
            .expiry
            .lifespan
            .is_some_and(|lifespan| now.duration_since(self.created) >= lifespan);
        let idle_over = self
            .expiry
            .max_idle
            .is_some_and(|max_idle| now.duration_since(self.last_access) >= max_idle);
        lifespan_over || idle_over
    }
}

struct MemoryCache {
    running: Running,
    latency: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Live value of `key`, dropping it if it expired
    fn live_value(entries: &mut HashMap<String, CacheEntry>, key: &str, now: Instant) -> Option<Vec<u8>> {
        let expired = entries.get(key)?.is_expired(now);
        if expired {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        Self::live_value(&mut self.entries.lock(), key, Instant::now())
    }

    fn store(&self, key: String, value: Vec<u8>, expiry: Expiry) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        let previous = Self::live_value(&mut entries, &key, Instant::now());
        entries.insert(key, CacheEntry::new(value, expiry));
        previous
    }
}

#[async_trait]
impl TimeoutCache for MemoryCache {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, AdapterError> {
        self.running.check()?;
        tokio::time::timeout(timeout, async {
            self.simulate_latency().await;
            self.lookup(key)
        })
        .await
        .map_err(|_| AdapterError::Timeout(timeout))
    }

    async fn put(&self, key: String, value: Vec<u8>, timeout: Duration) -> Result<(), AdapterError> {
        self.running.check()?;
        tokio::time::timeout(timeout, async {
            self.simulate_latency().await;
            self.store(key, value, Expiry::default());
        })
        .await
        .map_err(|_| AdapterError::Timeout(timeout))
    }
}

#[async_trait]
impl TemporalCache for MemoryCache {
    async fn put(&self, key: String, value: Vec<u8>, expiry: Expiry) -> Result<(), AdapterError> {
        self.running.check()?;
        self.simulate_latency().await;
        self.store(key, value, expiry);
        Ok(())
    }

    async fn get_and_put(&self, key: String, value: Vec<u8>, expiry: Expiry) -> Result<Option<Vec<u8>>, AdapterError> {
        self.running.check()?;
        self.simulate_latency().await;
        Ok(self.store(key, value, expiry))
    }

    async fn put_if_absent(&self, key: String, value: Vec<u8>, expiry: Expiry) -> Result<bool, AdapterError> {
        self.running.check()?;
        self.simulate_latency().await;
        let mut entries = self.entries.lock();
        if Self::live_value(&mut entries, &key, Instant::now()).is_some() {
            return Ok(false);
        }
        entries.insert(key, CacheEntry::new(value, expiry));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started(config: MemoryServiceConfig) -> Arc<MemoryService> {
        let service = MemoryService::new(config);
        service.start().await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_calls_fail_when_not_running() {
        let service = MemoryService::new(MemoryServiceConfig::default());
        assert!(!service.is_running());
        assert!(matches!(service.strong_counter("c"), Err(AdapterError::NotRunning)));

        service.start().await.unwrap();
        let counter = service.strong_counter("c").unwrap();
        assert_eq!(counter.increment_and_get().await.unwrap(), 1);

        service.stop().await.unwrap();
        assert_eq!(counter.increment_and_get().await, Err(AdapterError::NotRunning));
    }

    #[tokio::test]
    async fn test_strong_counter_operations() {
        let service = started(MemoryServiceConfig::default()).await;
        let counter = service.strong_counter("strong").unwrap();

        assert_eq!(counter.increment_and_get().await.unwrap(), 1);
        assert_eq!(counter.add_and_get(5).await.unwrap(), 6);
        assert_eq!(counter.decrement_and_get().await.unwrap(), 5);
        assert!(counter.compare_and_set(5, 10).await.unwrap());
        assert!(!counter.compare_and_set(5, 11).await.unwrap());
        assert_eq!(counter.get_value().await.unwrap(), 10);

        // Same name resolves to the same counter
        let again = service.strong_counter("strong").unwrap();
        again.reset().await.unwrap();
        assert_eq!(counter.get_value().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_weak_counter_sums_stripes() {
        let service = started(MemoryServiceConfig::default()).await;
        let counter = service.weak_counter("weak").unwrap();
        for _ in 0..100 {
            counter.add(2).await.unwrap();
        }
        assert_eq!(counter.get_value().await.unwrap(), 200);
        counter.reset().await.unwrap();
        assert_eq!(counter.get_value().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_operations_time_out() {
        let service = started(MemoryServiceConfig::default().with_latency(Duration::from_millis(100))).await;
        let cache = TimeoutOperations::cache(service.as_ref(), "timeouts").unwrap();

        cache
            .put("k".to_string(), b"v".to_vec(), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(
            cache.get("k", Duration::from_millis(500)).await.unwrap(),
            Some(b"v".to_vec())
        );
        assert_eq!(
            cache.get("k", Duration::from_millis(50)).await,
            Err(AdapterError::Timeout(Duration::from_millis(50)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_temporal_expiry() {
        let service = started(MemoryServiceConfig::default()).await;
        let cache = TemporalOperations::cache(service.as_ref(), "temporal").unwrap();
        let lookup = TimeoutOperations::cache(service.as_ref(), "temporal").unwrap();
        let timeout = Duration::from_secs(1);

        cache
            .put("lifespan".to_string(), b"a".to_vec(), Expiry::from_millis(1_000, None))
            .await
            .unwrap();
        cache
            .put("idle".to_string(), b"b".to_vec(), Expiry::from_millis(-1, Some(300)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(lookup.get("idle", timeout).await.unwrap().is_some());
        tokio::time::advance(Duration::from_millis(200)).await;
        // accessed 200ms ago, still within max idle
        assert!(lookup.get("idle", timeout).await.unwrap().is_some());
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(lookup.get("idle", timeout).await.unwrap().is_none());

        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(lookup.get("lifespan", timeout).await.unwrap().is_none());

        assert!(cache
            .put_if_absent("lifespan".to_string(), b"c".to_vec(), Expiry::default())
            .await
            .unwrap());
        assert!(!cache
            .put_if_absent("lifespan".to_string(), b"d".to_vec(), Expiry::default())
            .await
            .unwrap());
        assert_eq!(
            cache
                .get_and_put("lifespan".to_string(), b"e".to_vec(), Expiry::default())
                .await
                .unwrap(),
            Some(b"c".to_vec())
        );
    }

    #[tokio::test]
    async fn test_socket_timeout_reconfiguration() {
        let service = started(MemoryServiceConfig::default().with_socket_timeout(Duration::from_secs(5))).await;
        assert_eq!(service.socket_timeout(), Duration::from_secs(5));

        service
            .reconfigure_socket_timeout(Duration::from_millis(1_500))
            .await
            .unwrap();
        assert_eq!(service.socket_timeout(), Duration::from_millis(1_500));
        assert_eq!(service.reconnect_count(), 1);
    }
}
