//! TTL response cache bounded by entry count and byte cost
//!
//! Keyed by resource URL. Entries expire lazily on read; when either bound
//! is exceeded the least recently used entries are evicted until the cache
//! fits again. All synchronization is internal, so concurrent `get`/`set`
//! callers never coordinate locks themselves.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::time::{Clock, SystemClock};

/// A cached response body with its expiry
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Vec<u8>,
    pub cached_at: Instant,
    pub expires_at: Instant,
}

impl CachedResponse {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Maximum total byte cost across all bodies
    pub max_bytes: usize,
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_bytes: 10 * 1024 * 1024,
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub total_bytes: usize,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, CachedResponse>,
    /// Keys ordered least to most recently used
    access_order: Vec<String>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            access_order: Vec::new(),
            total_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn touch(&mut self, key: &str) {
        self.access_order.retain(|k| k != key);
        self.access_order.push(key.to_string());
    }

    fn drop_entry(&mut self, key: &str) -> Option<CachedResponse> {
        let removed = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(removed.body.len());
        self.access_order.retain(|k| k != key);
        Some(removed)
    }
}

/// Thread-safe TTL cache for response bodies
pub struct ResponseCache<C: Clock = SystemClock> {
    state: RwLock<CacheState>,
    config: CacheConfig,
    clock: C,
}

impl ResponseCache<SystemClock> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for ResponseCache<SystemClock> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<C: Clock> ResponseCache<C> {
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self { state: RwLock::new(CacheState::new()), config, clock }
    }

    /// Returns the fresh entry for `key`, or `None` on miss.
    ///
    /// An expired entry is removed on the spot and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = self.clock.now();
        let mut state = self.state.write();

        let Some(entry) = state.entries.get(key) else {
            state.misses += 1;
            return None;
        };

        if entry.is_expired(now) {
            state.drop_entry(key);
            state.expirations += 1;
            state.misses += 1;
            return None;
        }

        let entry = entry.clone();
        state.hits += 1;
        state.touch(key);
        Some(entry)
    }

    /// Stores `body` under `key`, evicting least recently used entries
    /// until both bounds hold.
    pub fn set(&self, key: &str, body: Vec<u8>, ttl: Option<Duration>) {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CachedResponse { cached_at: now, expires_at: now + ttl, body };

        let mut state = self.state.write();
        state.drop_entry(key);
        state.total_bytes += entry.body.len();
        state.entries.insert(key.to_string(), entry);
        state.touch(key);

        while state.entries.len() > self.config.max_entries
            || state.total_bytes > self.config.max_bytes
        {
            let Some(oldest) = state.access_order.first().cloned() else {
                break;
            };
            state.drop_entry(&oldest);
            state.evictions += 1;
        }
    }

    /// Removes the entry for `key`, if any.
    pub fn invalidate(&self, key: &str) {
        self.state.write().drop_entry(key);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.access_order.clear();
        state.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Counter snapshot for diagnostics surfaces.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MockClock;

    fn small_cache(clock: MockClock) -> ResponseCache<MockClock> {
        ResponseCache::with_clock(
            CacheConfig { max_entries: 3, max_bytes: 1024, default_ttl: Duration::from_secs(60) },
            clock,
        )
    }

    #[test]
    fn test_round_trip_and_ttl_expiry() {
        let clock = MockClock::new();
        let cache = small_cache(clock.clone());

        cache.set("https://api.example.com/items", b"[1,2,3]".to_vec(), Some(Duration::from_secs(60)));

        let hit = cache.get("https://api.example.com/items").expect("fresh entry");
        assert_eq!(hit.body, b"[1,2,3]");

        clock.advance(Duration::from_secs(61));
        assert!(cache.get("https://api.example.com/items").is_none());
        assert_eq!(cache.len(), 0, "expired entry is removed on read");
    }

    #[test]
    fn test_entry_fresh_until_exact_expiry() {
        let clock = MockClock::new();
        let cache = small_cache(clock.clone());

        cache.set("k", b"v".to_vec(), Some(Duration::from_secs(60)));

        clock.advance(Duration::from_secs(59));
        assert!(cache.get("k").is_some());

        // Expiry is inclusive: now >= expires_at means expired.
        clock.advance(Duration::from_secs(1));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_count_bound_evicts_least_recently_used() {
        let clock = MockClock::new();
        let cache = small_cache(clock.clone());

        cache.set("a", b"1".to_vec(), None);
        cache.set("b", b"2".to_vec(), None);
        cache.set("c", b"3".to_vec(), None);

        // Touch "a" so "b" becomes the LRU entry.
        cache.get("a");
        cache.set("d", b"4".to_vec(), None);

        assert!(cache.get("b").is_none(), "LRU entry evicted");
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_byte_bound_evicts_until_within_budget() {
        let clock = MockClock::new();
        let cache = ResponseCache::with_clock(
            CacheConfig { max_entries: 100, max_bytes: 10, default_ttl: Duration::from_secs(60) },
            clock,
        );

        cache.set("a", vec![0u8; 4], None);
        cache.set("b", vec![0u8; 4], None);
        cache.set("c", vec![0u8; 4], None);

        assert!(cache.stats().total_bytes <= 10);
        assert!(cache.get("a").is_none(), "oldest entry evicted to fit byte budget");
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_oversized_entry_clears_itself() {
        let clock = MockClock::new();
        let cache = ResponseCache::with_clock(
            CacheConfig { max_entries: 100, max_bytes: 10, default_ttl: Duration::from_secs(60) },
            clock,
        );

        cache.set("big", vec![0u8; 64], None);
        assert!(cache.is_empty(), "entry larger than the whole budget cannot be kept");
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let clock = MockClock::new();
        let cache = small_cache(clock);

        cache.set("k", b"v".to_vec(), None);
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_replacing_entry_adjusts_byte_total() {
        let clock = MockClock::new();
        let cache = small_cache(clock);

        cache.set("k", vec![0u8; 100], None);
        cache.set("k", vec![0u8; 8], None);

        assert_eq!(cache.stats().total_bytes, 8);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stats_track_hits_misses_expirations() {
        let clock = MockClock::new();
        let cache = small_cache(clock.clone());

        cache.set("k", b"v".to_vec(), Some(Duration::from_secs(10)));
        cache.get("k");
        cache.get("absent");
        clock.advance(Duration::from_secs(11));
        cache.get("k");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_clear_resets_contents() {
        let clock = MockClock::new();
        let cache = small_cache(clock);

        cache.set("a", b"1".to_vec(), None);
        cache.set("b", b"2".to_vec(), None);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().total_bytes, 0);
    }
}
