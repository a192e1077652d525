//! Short-TTL read cache keyed by logical resource prefix.
//!
//! Entries are keyed by prefixes such as `ready_post/instagram/alice`. The
//! webhook path evicts a prefix whenever storage reports a mutation under it,
//! and readers decide freshness per call by passing their own TTL.
//!
//! All state sits behind one mutex, so an `invalidate` is visible to every
//! `get` that starts after it returns.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One cached value.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub prefix: String,
    pub value: V,
    pub inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// Hit/miss accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: usize,
}

/// Proof that a refill started before any later invalidation of its prefix.
#[derive(Clone, Debug)]
pub struct FillTicket {
    prefix: String,
    epoch: u64,
}

struct Inner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    /// Invalidation epoch per recently invalidated prefix.
    invalidated: LruCache<String, u64>,
    /// Highest epoch pushed out of `invalidated`.
    evicted_floor: u64,
    epoch: u64,
}

/// In-memory TTL cache.
pub struct Cache<V = serde_json::Value> {
    inner: Mutex<Inner<V>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl<V: Clone> Cache<V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                invalidated: LruCache::new(capacity),
                evicted_floor: 0,
                epoch: 0,
            }),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Value for `prefix` if present and younger than the default TTL.
    pub fn get(&self, prefix: &str) -> Option<V> {
        self.get_fresh(prefix, self.default_ttl)
    }

    /// Value for `prefix` if present and younger than `ttl`.
    pub fn get_fresh(&self, prefix: &str, ttl: Duration) -> Option<V> {
        let found = {
            let mut inner = self.inner.lock();
            inner
                .entries
                .get(prefix)
                .filter(|entry| entry.is_fresh(ttl))
                .map(|entry| entry.value.clone())
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert or replace the value for `prefix`. Last write wins.
    pub fn put(&self, prefix: impl Into<String>, value: V) {
        let prefix = prefix.into();
        let entry = CacheEntry {
            prefix: prefix.clone(),
            value,
            inserted_at: Instant::now(),
        };
        self.inner.lock().entries.put(prefix, entry);
    }

    /// Drop `prefix`. Missing keys are a no-op.
    pub fn invalidate(&self, prefix: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            let epoch = inner.epoch;
            if let Some((key, evicted)) = inner.invalidated.push(prefix.to_string(), epoch) {
                // `push` also hands back the replaced value for an existing key.
                if key != prefix {
                    inner.evicted_floor = inner.evicted_floor.max(evicted);
                }
            }
            inner.entries.pop(prefix).is_some()
        };

        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(prefix, removed, "cache prefix invalidated");
        removed
    }

    /// True iff an entry for `prefix` exists and is younger than `ttl`.
    pub fn should_use(&self, prefix: &str, ttl: Duration) -> bool {
        self.inner
            .lock()
            .entries
            .peek(prefix)
            .is_some_and(|entry| entry.is_fresh(ttl))
    }

    /// Start a refill of `prefix` from the backing store.
    pub fn begin_fill(&self, prefix: impl Into<String>) -> FillTicket {
        let epoch = self.inner.lock().epoch;
        FillTicket {
            prefix: prefix.into(),
            epoch,
        }
    }

    /// Store a refilled value unless `prefix` was invalidated since the ticket
    /// was issued. Returns whether the value was stored.
    pub fn complete_fill(&self, ticket: FillTicket, value: V) -> bool {
        let mut inner = self.inner.lock();
        let stale = match inner.invalidated.peek(&ticket.prefix) {
            Some(&invalidated_at) => invalidated_at > ticket.epoch,
            // Tracking for this prefix may have been evicted; be conservative.
            None => inner.evicted_floor > ticket.epoch,
        };
        if stale {
            debug!(prefix = %ticket.prefix, "discarding refill that raced an invalidation");
            return false;
        }

        let entry = CacheEntry {
            prefix: ticket.prefix.clone(),
            value,
            inserted_at: Instant::now(),
        };
        inner.entries.put(ticket.prefix, entry);
        true
    }

    /// Remove every entry older than `ttl`. Returns how many were removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(ttl))
            .map(|(prefix, _)| prefix.clone())
            .collect();
        for prefix in &expired {
            inner.entries.pop(prefix);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl<V: Clone + Send + 'static> Cache<V> {
    /// Periodically sweep expired entries until `token` is cancelled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep(self.default_ttl);
                        if removed > 0 {
                            debug!(removed, "swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_put_get_and_stats() {
        let cache: Cache = Cache::new(16, TTL);
        assert!(cache.get("a/b/c").is_none());

        cache.put("a/b/c", json!({"v": 1}));
        assert_eq!(cache.get("a/b/c"), Some(json!({"v": 1})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_treated_as_absent() {
        let cache: Cache = Cache::new(16, TTL);
        cache.put("p", json!(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("p").is_none());
        assert!(!cache.should_use("p", TTL));
        // Longer caller-supplied TTL still accepts it.
        assert!(cache.should_use("p", Duration::from_secs(120)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_missing_is_noop() {
        let cache: Cache = Cache::new(16, TTL);
        assert!(!cache.invalidate("never/was/here"));
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_is_visible_immediately() {
        let cache: Cache = Cache::new(16, TTL);
        cache.put("ready_post/instagram/alice", json!("cached"));
        assert!(cache.invalidate("ready_post/instagram/alice"));

        assert!(cache.get("ready_post/instagram/alice").is_none());
        assert!(!cache.should_use("ready_post/instagram/alice", Duration::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_racing_invalidation_is_discarded() {
        let cache: Cache = Cache::new(16, TTL);
        let ticket = cache.begin_fill("p");
        cache.invalidate("p");

        assert!(!cache.complete_fill(ticket, json!("stale")));
        assert!(cache.get("p").is_none());

        let ticket = cache.begin_fill("p");
        assert!(cache.complete_fill(ticket, json!("fresh")));
        assert_eq!(cache.get("p"), Some(json!("fresh")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_conservative_after_tracking_eviction() {
        let cache: Cache = Cache::new(2, TTL);
        let ticket = cache.begin_fill("p");
        cache.invalidate("p");
        cache.invalidate("q");
        cache.invalidate("r");

        assert!(!cache.complete_fill(ticket, json!("stale")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache: Cache = Cache::new(16, TTL);
        cache.put("old", json!(1));
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.put("new", json!(2));
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(cache.sweep(TTL), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_capacity_evicts_oldest() {
        let cache: Cache = Cache::new(2, TTL);
        cache.put("a", json!(1));
        cache.put("b", json!(2));
        cache.put("c", json!(3));

        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let cache: Arc<Cache> = Arc::new(Cache::new(16, TTL));
        cache.put("p", json!(1));
        let token = CancellationToken::new();
        let handle = Arc::clone(&cache).spawn_sweeper(Duration::from_secs(10), token.clone());

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(cache.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
