//! Parse cache for request strings.
//!
//! Parsing is pure, so the result of parsing one `(table, select, filter, order)`
//! combination can be shared between requests. Compilation still runs per
//! request because limits and payloads differ.
//!
//! ## Design
//!
//! - **Cache Key**: The raw request strings, compared in full
//! - **Cache Value**: `Arc<ParsedQuery>`, immutable once inserted
//! - **Concurrent Access**: `DashMap` sharded locking
//! - **TTL Eviction**: Stale entries are dropped on read and by probabilistic cleanup on insert
//! - **Capacity**: At 1.5x capacity the oldest live entries are evicted back below capacity,
//!   since keys carry filter literals and the key space is unbounded

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::config::CacheConfig;
use crate::filter::Expression;
use crate::order::OrderSpec;
use crate::select::SelectNode;

/// Maximum age in seconds before an entry becomes stale (default: 1 hour)
const DEFAULT_MAX_AGE_SECS: u64 = 3600;

/// Probability (1/N) of running cleanup on insert once at capacity
const CLEANUP_PROBABILITY: u32 = 100;

/// Force cleanup when exceeding capacity by this factor
const HARD_CAPACITY_MULTIPLIER: f32 = 1.5;

/// Raw request strings identifying a parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    pub table: String,
    pub select: Option<String>,
    pub filter: Option<String>,
    pub order: Option<String>,
}

impl QueryCacheKey {
    pub fn new(
        table: &str,
        select: Option<&str>,
        filter: Option<&str>,
        order: Option<&str>,
    ) -> Self {
        Self {
            table: table.to_string(),
            select: select.map(str::to_string),
            filter: filter.map(str::to_string),
            order: order.map(str::to_string),
        }
    }
}

/// Parsed request trees.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub select: Vec<SelectNode>,
    pub filter: Option<Expression>,
    pub order: Vec<OrderSpec>,
}

struct CacheEntry {
    query: Arc<ParsedQuery>,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_stale(&self, max_age_secs: u64) -> bool {
        self.cached_at.elapsed().as_secs() > max_age_secs
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub insertions: AtomicU64,
    pub size: AtomicUsize,
}

impl CacheStatistics {
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;

        if total == 0.0 { 0.0 } else { hits / total }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub insertions: u64,
    pub size: usize,
    pub hit_ratio: f64,
}

/// Thread-safe parse cache with TTL eviction.
pub struct QueryCache {
    cache: DashMap<QueryCacheKey, CacheEntry>,
    /// Soft capacity; cleanup starts once reached, eviction at the hard limit
    capacity: usize,
    max_age_secs: u64,
    enabled: bool,
    stats: Arc<CacheStatistics>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("capacity", &self.capacity)
            .field("size", &self.cache.len())
            .field("max_age_secs", &self.max_age_secs)
            .field("enabled", &self.enabled)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: DashMap::with_capacity(capacity),
            capacity,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            enabled: true,
            stats: Arc::new(CacheStatistics::default()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self::new(config.capacity).with_max_age(config.max_age_secs)
    }

    /// Create a disabled cache (no-op).
    pub fn disabled() -> Self {
        Self {
            cache: DashMap::new(),
            capacity: 0,
            max_age_secs: 0,
            enabled: false,
            stats: Arc::new(CacheStatistics::default()),
        }
    }

    pub fn with_max_age(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, key: &QueryCacheKey) -> Option<Arc<ParsedQuery>> {
        if !self.enabled {
            return None;
        }

        if let Some(entry) = self.cache.get(key) {
            if entry.is_stale(self.max_age_secs) {
                drop(entry); // release the shard read lock before removing
                self.cache.remove(key);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.size.store(self.cache.len(), Ordering::Relaxed);
                return None;
            }

            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(&entry.query));
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: QueryCacheKey, query: Arc<ParsedQuery>) {
        if !self.enabled {
            return;
        }

        let current_len = self.cache.len();
        let hard_limit = (self.capacity as f32 * HARD_CAPACITY_MULTIPLIER) as usize;

        if current_len >= self.capacity {
            let should_cleanup = fastrand::u32(0..CLEANUP_PROBABILITY) == 0;
            if should_cleanup || current_len >= hard_limit {
                self.cleanup_stale();
            }
            if self.cache.len() >= hard_limit.max(self.capacity) {
                // leave room for the entry about to be inserted
                let keep = self.capacity.saturating_sub(1);
                self.evict_oldest(self.cache.len().saturating_sub(keep));
            }
        }

        self.cache.insert(
            key,
            CacheEntry {
                query,
                cached_at: Instant::now(),
            },
        );
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
        self.stats.size.store(self.cache.len(), Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.cache.clear();
        self.stats.size.store(0, Ordering::Relaxed);
    }

    /// Remove stale entries.
    pub fn cleanup_stale(&self) {
        let before = self.cache.len();
        self.cache
            .retain(|_, entry| !entry.is_stale(self.max_age_secs));
        let removed = before.saturating_sub(self.cache.len());

        self.stats
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        self.stats.size.store(self.cache.len(), Ordering::Relaxed);
    }

    /// Drop the `count` entries with the oldest `cached_at`.
    fn evict_oldest(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut ages: Vec<(Instant, QueryCacheKey)> = self
            .cache
            .iter()
            .map(|entry| (entry.cached_at, entry.key().clone()))
            .collect();
        ages.sort_unstable_by_key(|(cached_at, _)| *cached_at);

        let mut removed = 0u64;
        for (_, key) in ages.into_iter().take(count) {
            if self.cache.remove(&key).is_some() {
                removed += 1;
            }
        }
        self.stats.evictions.fetch_add(removed, Ordering::Relaxed);
        self.stats.size.store(self.cache.len(), Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(1000)
    }
}
