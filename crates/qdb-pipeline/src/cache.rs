//! Fingerprint-keyed result cache.
//!
//! Entries are evicted least-recently-used first once either the entry count
//! or the byte budget is exceeded. Expiry is checked lazily on read. Writes to
//! a dataset invalidate every entry planned against an older generation of it,
//! and raise a watermark so results still in flight from before the write are
//! refused when they arrive.

use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::dataset::GenerationToken;
use crate::executor::ExecutionResult;
use crate::fingerprint::Fingerprint;

/// A cached result with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Arc<ExecutionResult>,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub hits: u64,
    pub size_bytes: u64,
}

impl CacheEntry {
    fn new(result: Arc<ExecutionResult>, size_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            result,
            created_at: now,
            last_accessed: now,
            hits: 0,
            size_bytes,
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.created_at.elapsed() >= ttl)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    /// Share of the byte budget in use, in percent.
    pub usage_percent: f64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Why a result was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    Disabled,
    /// The result carries partial failures.
    Partial,
    /// The result alone exceeds the byte budget.
    TooLarge,
    /// A dataset the result read was written after it was planned.
    Stale,
}

struct Inner {
    entries: LruCache<Fingerprint, CacheEntry>,
    bytes: u64,
    /// Newest generation seen in an invalidation, per dataset.
    watermarks: FxHashMap<String, u64>,
    stats: CacheStats,
}

/// Thread-safe result cache.
pub struct ResultCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                bytes: 0,
                watermarks: FxHashMap::default(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up `fingerprint`, refreshing its recency.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<ExecutionResult>> {
        if !self.config.enabled {
            return None;
        }
        let ttl = self.config.ttl();
        let mut inner = self.inner.lock();

        let Some(expired) = inner.entries.peek(fingerprint).map(|e| e.is_expired(ttl)) else {
            inner.stats.misses += 1;
            return None;
        };
        if expired {
            if let Some(entry) = inner.entries.pop(fingerprint) {
                inner.bytes -= entry.size_bytes;
            }
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            tracing::trace!(fingerprint = %fingerprint.short(), "Cache entry expired");
            return None;
        }

        inner.stats.hits += 1;
        let entry = inner.entries.get_mut(fingerprint)?;
        entry.hits += 1;
        entry.last_accessed = Instant::now();
        Some(Arc::clone(&entry.result))
    }

    /// Store `result` under `fingerprint`, replacing any previous entry.
    pub fn put(&self, fingerprint: Fingerprint, result: Arc<ExecutionResult>) -> PutOutcome {
        if !self.config.enabled {
            return PutOutcome::Disabled;
        }
        if result.is_partial() {
            return PutOutcome::Partial;
        }
        let size = result.approx_size_bytes();
        if size > self.config.max_bytes {
            tracing::debug!(fingerprint = %fingerprint.short(), size, "Result too large to cache");
            return PutOutcome::TooLarge;
        }

        let mut inner = self.inner.lock();
        let stale = result.generations.iter().any(|(dataset, generation)| {
            inner
                .watermarks
                .get(dataset)
                .is_some_and(|newest| generation < *newest)
        });
        if stale {
            tracing::debug!(fingerprint = %fingerprint.short(), "Refusing stale result");
            return PutOutcome::Stale;
        }

        if let Some(old) = inner.entries.pop(&fingerprint) {
            inner.bytes -= old.size_bytes;
        }
        while inner.entries.len() >= self.config.max_entries
            || inner.bytes + size > self.config.max_bytes
        {
            let Some((evicted, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.bytes -= entry.size_bytes;
            inner.stats.evictions += 1;
            tracing::trace!(fingerprint = %evicted.short(), "Cache entry evicted");
        }

        inner.bytes += size;
        inner.entries.put(fingerprint, CacheEntry::new(result, size));
        PutOutcome::Stored
    }

    /// Drop every entry planned against a generation of `token.dataset` older
    /// than `token.generation`. Returns the number of entries removed.
    pub fn invalidate(&self, token: &GenerationToken) -> usize {
        let mut inner = self.inner.lock();
        let watermark = inner.watermarks.entry(token.dataset.clone()).or_insert(0);
        *watermark = (*watermark).max(token.generation);

        let stale: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.result.generations.is_stale_for(token))
            .map(|(fp, _)| *fp)
            .collect();
        for fp in &stale {
            if let Some(entry) = inner.entries.pop(fp) {
                inner.bytes -= entry.size_bytes;
            }
        }
        inner.stats.invalidations += stale.len() as u64;

        if !stale.is_empty() {
            tracing::debug!(
                dataset = %token.dataset,
                generation = token.generation,
                removed = stale.len(),
                "Cache invalidated"
            );
        }
        stale.len()
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.pop(fingerprint) {
            Some(entry) => {
                inner.bytes -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.entries = inner.entries.len();
        stats.bytes = inner.bytes;
        stats.usage_percent = if self.config.max_bytes == 0 {
            0.0
        } else {
            inner.bytes as f64 / self.config.max_bytes as f64 * 100.0
        };
        stats
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetCatalog;
    use crate::fingerprint::fingerprint_parts;
    use crate::job::JobDescription;

    fn fp(n: i64) -> Fingerprint {
        fingerprint_parts(&JobDescription::new("op").with_param("n", n), "s")
    }

    fn result_with(output: &str, catalog: Option<&DatasetCatalog>) -> Arc<ExecutionResult> {
        let generations = match catalog {
            Some(c) => c.snapshot(&["users".to_string()]).unwrap(),
            None => Default::default(),
        };
        Arc::new(ExecutionResult {
            strategy: "s".into(),
            backend: "b".into(),
            output: Some(output.into()),
            distribution: None,
            repetitions: 1,
            units_consumed: 1,
            step_outputs: Vec::new(),
            partial_failures: Vec::new(),
            generations,
            elapsed: Duration::ZERO,
        })
    }

    fn config(max_entries: usize, max_bytes: u64, ttl_ms: Option<u64>) -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_entries,
            max_bytes,
            ttl_ms,
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ResultCache::new(CacheConfig::default());
        assert!(cache.get(&fp(1)).is_none());
        assert_eq!(cache.put(fp(1), result_with("a", None)), PutOutcome::Stored);

        let hit = cache.get(&fp(1)).unwrap();
        assert_eq!(hit.output.as_deref(), Some("a"));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.bytes > 0);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_lru_eviction_by_entries() {
        let cache = ResultCache::new(config(2, u64::MAX, None));
        cache.put(fp(1), result_with("a", None));
        cache.put(fp(2), result_with("b", None));
        cache.get(&fp(1));
        cache.put(fp(3), result_with("c", None));

        assert!(cache.get(&fp(1)).is_some());
        assert!(cache.get(&fp(2)).is_none());
        assert!(cache.get(&fp(3)).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_eviction_by_bytes() {
        let size = result_with("a", None).approx_size_bytes();
        let cache = ResultCache::new(config(100, size * 2, None));
        cache.put(fp(1), result_with("a", None));
        cache.put(fp(2), result_with("b", None));
        cache.put(fp(3), result_with("c", None));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fp(1)).is_none());
        assert!(cache.stats().bytes <= size * 2);
    }

    #[tokio::test]
    async fn test_oversize_and_partial_results_rejected() {
        let cache = ResultCache::new(config(10, 8, None));
        assert_eq!(cache.put(fp(1), result_with("a", None)), PutOutcome::TooLarge);

        let cache = ResultCache::new(CacheConfig::default());
        let mut partial = (*result_with("a", None)).clone();
        partial.partial_failures.push("batch failed".into());
        assert_eq!(cache.put(fp(1), Arc::new(partial)), PutOutcome::Partial);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_is_lazy() {
        let cache = ResultCache::new(config(10, u64::MAX, Some(1_000)));
        cache.put(fp(1), result_with("a", None));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(cache.get(&fp(1)).is_some());
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(&fp(1)).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_watermark() {
        let catalog = DatasetCatalog::new();
        catalog.register("users");

        let cache = ResultCache::new(CacheConfig::default());
        let before_write = result_with("old", Some(&catalog));
        cache.put(fp(1), before_write.clone());
        cache.put(fp(2), result_with("unrelated", None));

        let token = catalog.record_write("users").unwrap();
        assert_eq!(cache.invalidate(&token), 1);
        assert!(cache.get(&fp(1)).is_none());
        assert!(cache.get(&fp(2)).is_some());

        // A result planned before the write must not re-enter the cache.
        assert_eq!(cache.put(fp(1), before_write), PutOutcome::Stale);
        assert_eq!(
            cache.put(fp(1), result_with("new", Some(&catalog))),
            PutOutcome::Stored
        );
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = ResultCache::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(cache.put(fp(1), result_with("a", None)), PutOutcome::Disabled);
        assert!(cache.get(&fp(1)).is_none());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = ResultCache::new(CacheConfig::default());
        cache.put(fp(1), result_with("a", None));
        cache.put(fp(2), result_with("b", None));
        assert!(cache.remove(&fp(1)));
        assert!(!cache.remove(&fp(1)));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().bytes, 0);
    }
}
