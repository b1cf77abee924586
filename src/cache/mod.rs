use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::{AggregatorError, Result};
use crate::offers::Offer;

/// TTL defaults per key category plus the sweep cadence
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub offers_ttl: Duration,
    pub session_ttl: Duration,
    pub proxy_ttl: Duration,
    pub health_ttl: Duration,
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            offers_ttl: Duration::from_secs(5 * 60),
            session_ttl: Duration::from_secs(30 * 60),
            proxy_ttl: Duration::from_secs(10 * 60),
            health_ttl: Duration::from_secs(30),
            default_ttl: Duration::from_secs(2 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
    approx_size: usize,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub approx_memory_bytes: u64,
}

/// TTL key/value store with category-derived expiry and pattern
/// invalidation.
///
/// Expiry is lazy on `get`; a periodic sweep additionally removes entries
/// strictly past their TTL. The sweep runs as an explicitly started and
/// stopped task so tests never leak timers.
pub struct TtlCache<V> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    config: CacheConfig,
    hits: Arc<RwLock<u64>>,
    misses: Arc<RwLock<u64>>,
    sweeper: Mutex<Option<(broadcast::Sender<()>, tokio::task::JoinHandle<()>)>>,
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
            hits: Arc::new(RwLock::new(0)),
            misses: Arc::new(RwLock::new(0)),
            sweeper: Mutex::new(None),
        }
    }

    // derive a TTL from the key's category prefix
    fn resolve_ttl(&self, key: &str, explicit: Option<Duration>) -> Duration {
        if let Some(ttl) = explicit {
            return ttl;
        }
        if key.starts_with("offers:") {
            self.config.offers_ttl
        } else if key.starts_with("session:") {
            self.config.session_ttl
        } else if key.starts_with("proxy:") {
            self.config.proxy_ttl
        } else if key.starts_with("health:") {
            self.config.health_ttl
        } else {
            self.config.default_ttl
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.write().await;

        let expired = matches!(entries.get(key), Some(entry) if entry.is_expired());
        if expired {
            entries.remove(key);
            debug!("Cache entry {} expired, treating as miss", key);
        }

        let value = if let Some(entry) = entries.get_mut(key) {
            entry.hit_count += 1;
            Some(entry.value.clone())
        } else {
            None
        };
        drop(entries);

        match value {
            Some(value) => {
                *self.hits.write().await += 1;
                Some(value)
            }
            None => {
                *self.misses.write().await += 1;
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = self.resolve_ttl(key, ttl);
        let approx_size = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);

        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
                hit_count: 0,
                approx_size,
            },
        );
    }

    /// Return the cached value, or compute, store and return it.
    ///
    /// The compute runs at most once per call; a compute failure is
    /// propagated and leaves the cache unmodified. No coalescing across
    /// concurrent callers is guaranteed (last write wins).
    pub async fn get_or_set<F, Fut>(&self, key: &str, compute: F, ttl: Option<Duration>) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = compute()
            .await
            .map_err(|e| AggregatorError::CacheCompute(format!("compute for {}: {}", key, e)))?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Remove every entry whose key matches the regex. Returns the count.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)
            .map_err(|e| AggregatorError::ParseError(format!("invalid pattern '{}': {}", pattern, e)))?;

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !regex.is_match(key));
        let removed = before - entries.len();

        if removed > 0 {
            info!("Invalidated {} cache entries matching '{}'", removed, pattern);
        }
        Ok(removed)
    }

    /// Remove all expired entries. Returns the count.
    pub async fn cleanup(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();

        if removed > 0 {
            debug!("Cleanup removed {} expired cache entries", removed);
        }
        removed
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let hits = *self.hits.read().await;
        let misses = *self.misses.read().await;
        let lookups = hits + misses;

        CacheStats {
            entries: entries.len(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            approx_memory_bytes: entries.values().map(|e| e.approx_size as u64).sum(),
        }
    }

    /// Start the periodic expiry sweep.
    pub async fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            warn!("Cache sweeper already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let entries = self.entries.clone();
        let sweep_interval = self.config.sweep_interval;

        let task = tokio::spawn(async move {
            let mut tick = interval(sweep_interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Cache sweeper received shutdown signal");
                        break;
                    }
                    _ = tick.tick() => {
                        let mut entries_guard = entries.write().await;
                        let before = entries_guard.len();
                        entries_guard.retain(|_, entry| !entry.is_expired());
                        let removed = before - entries_guard.len();
                        drop(entries_guard);

                        if removed > 0 {
                            debug!("Cache sweep removed {} expired entries", removed);
                        }
                    }
                }
            }
        });

        *sweeper = Some((shutdown_tx, task));
        info!("Cache sweeper started (interval {:?})", sweep_interval);
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn stop(&self) {
        let taken = self.sweeper.lock().await.take();
        if let Some((shutdown_tx, task)) = taken {
            let _ = shutdown_tx.send(());
            if let Err(e) = task.await {
                warn!("Error waiting for cache sweeper to stop: {}", e);
            }
            info!("Cache sweeper stopped");
        }
    }
}

/// Cache instantiation used by the orchestration layer.
pub type OfferCache = TtlCache<Vec<Offer>>;

impl TtlCache<Vec<Offer>> {
    /// Drop offer-category entries, optionally scoped to one target URL.
    pub async fn invalidate_offers(&self, url: Option<&str>) -> Result<usize> {
        let pattern = match url {
            Some(url) => format!("^offers:{}:", regex::escape(url)),
            None => "^offers:".to_string(),
        };
        self.invalidate_pattern(&pattern).await
    }
}
