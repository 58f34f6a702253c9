//! In-memory cache tier with request coalescing and stale-while-revalidate.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Broadcast capacity per in-flight entry; one value is ever sent.
const FLIGHT_CHANNEL_CAPACITY: usize = 4;

enum Slot<T> {
    /// A computed value.
    Ready { value: T, written_at: Instant },
    /// A computation is running and nothing is cached yet.
    InFlight { tx: broadcast::Sender<Option<T>> },
    /// A stale value is being refreshed in the background.
    ///
    /// The original write time travels in the refresh guard so a failed
    /// refresh can restore the entry unchanged.
    Refreshing { value: T },
}

/// Outcome of a cache lookup.
pub enum Lookup<T> {
    /// Hit within the freshness window.
    Fresh(T),
    /// Stale hit; a refresh is already underway elsewhere.
    Stale(T),
    /// Stale hit; the caller owns the refresh and must resolve the guard.
    StaleRefresh(T, FlightGuard<T>),
    /// An identical request is in flight; await its broadcast result.
    Pending(broadcast::Receiver<Option<T>>),
    /// Nothing usable cached; the caller computes and resolves the guard.
    Miss(FlightGuard<T>),
}

/// Obligation to resolve an in-flight cache entry.
///
/// Produced by [`MemoryCache::begin`] for misses and stale refreshes.
/// Dropping the guard unresolved counts as failure: coalesced waiters are
/// released and a stale predecessor value, if any, is restored — a panicked
/// or abandoned computation never wedges the key.
pub struct FlightGuard<T> {
    key: String,
    entries: Arc<Mutex<LruCache<String, Slot<T>>>>,
    tx: broadcast::Sender<Option<T>>,
    /// Value and write time to restore if the refresh fails.
    previous: Option<(T, Instant)>,
    resolved: bool,
}

impl<T: Clone> FlightGuard<T> {
    /// Publishes the computed value to the cache and all coalesced waiters.
    pub fn complete(mut self, value: T) {
        {
            let mut entries = lock(&self.entries);
            entries.put(
                self.key.clone(),
                Slot::Ready {
                    value: value.clone(),
                    written_at: Instant::now(),
                },
            );
        }
        let _ = self.tx.send(Some(value));
        self.resolved = true;
    }

    /// Releases waiters after a failed computation.
    ///
    /// Explicit form of the drop behavior, for readable call sites.
    pub fn fail(self) {
        // Drop impl does the work.
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let mut entries = lock(&self.entries);
        match self.previous.take() {
            Some((value, written_at)) => {
                entries.put(self.key.clone(), Slot::Ready { value, written_at });
            },
            None => {
                entries.pop(&self.key);
            },
        }
        drop(entries);
        let _ = self.tx.send(None);
    }
}

fn lock<K, V>(mutex: &Mutex<LruCache<K, V>>) -> MutexGuard<'_, LruCache<K, V>>
where
    K: std::hash::Hash + Eq,
{
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Bounded TTL cache with single-flight semantics per key.
///
/// Entries younger than `fresh_ttl` are served directly. Entries older than
/// `fresh_ttl` but younger than `stale_ttl` are served stale while exactly
/// one caller refreshes in the background. Entries past `stale_ttl` are
/// treated as misses. Concurrent lookups of a key under computation share
/// the single in-flight result instead of issuing duplicate downstream
/// calls.
pub struct MemoryCache<T> {
    entries: Arc<Mutex<LruCache<String, Slot<T>>>>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
}

impl<T: Clone> MemoryCache<T> {
    /// Creates a cache bounded to `capacity` entries.
    ///
    /// `stale_ttl` is clamped to at least `fresh_ttl`.
    #[must_use]
    pub fn new(capacity: usize, fresh_ttl: Duration, stale_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1))
            .unwrap_or_else(|| unreachable!("capacity clamped to at least 1"));
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            fresh_ttl,
            stale_ttl: stale_ttl.max(fresh_ttl),
        }
    }

    /// Looks up a key, claiming the in-flight slot on miss or stale.
    pub fn begin(&self, key: &str) -> Lookup<T> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);

        match entries.get(key) {
            Some(Slot::Ready { value, written_at }) => {
                let age = now.saturating_duration_since(*written_at);
                if age <= self.fresh_ttl {
                    return Lookup::Fresh(value.clone());
                }
                if age <= self.stale_ttl {
                    let value = value.clone();
                    let written_at = *written_at;
                    let (tx, _rx) = broadcast::channel(FLIGHT_CHANNEL_CAPACITY);
                    entries.put(
                        key.to_string(),
                        Slot::Refreshing {
                            value: value.clone(),
                        },
                    );
                    drop(entries);
                    let guard = FlightGuard {
                        key: key.to_string(),
                        entries: Arc::clone(&self.entries),
                        tx,
                        previous: Some((value.clone(), written_at)),
                        resolved: false,
                    };
                    return Lookup::StaleRefresh(value, guard);
                }
                // Older than the stale window: fall through to a miss.
            },
            Some(Slot::Refreshing { value, .. }) => {
                return Lookup::Stale(value.clone());
            },
            Some(Slot::InFlight { tx }) => {
                return Lookup::Pending(tx.subscribe());
            },
            None => {},
        }

        let (tx, _rx) = broadcast::channel(FLIGHT_CHANNEL_CAPACITY);
        entries.put(key.to_string(), Slot::InFlight { tx: tx.clone() });
        drop(entries);
        Lookup::Miss(FlightGuard {
            key: key.to_string(),
            entries: Arc::clone(&self.entries),
            tx,
            previous: None,
            resolved: false,
        })
    }

    /// Inserts a ready value directly (persistent-tier repopulation).
    pub fn insert(&self, key: &str, value: T) {
        let mut entries = lock(&self.entries);
        entries.put(
            key.to_string(),
            Slot::Ready {
                value,
                written_at: Instant::now(),
            },
        );
    }

    /// Drops one key.
    pub fn invalidate(&self, key: &str) {
        lock(&self.entries).pop(key);
    }

    /// Drops every key matching the predicate.
    pub fn invalidate_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut entries = lock(&self.entries);
        let keys: Vec<String> = entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    /// Drops ready entries past the stale window. Returns the removed count.
    ///
    /// In-flight slots are left alone; their guards resolve them.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let keys: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| match slot {
                Slot::Ready { written_at, .. } => {
                    now.saturating_duration_since(*written_at) > self.stale_ttl
                },
                Slot::InFlight { .. } | Slot::Refreshing { .. } => false,
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    /// Current entry count, in-flight slots included.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns `true` when no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> MemoryCache<String> {
        MemoryCache::new(16, Duration::from_secs(5), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_then_fresh_hit() {
        let cache = cache();
        match cache.begin("k") {
            Lookup::Miss(guard) => guard.complete("v1".to_string()),
            _ => panic!("expected miss"),
        }
        match cache.begin("k") {
            Lookup::Fresh(value) => assert_eq!(value, "v1"),
            _ => panic!("expected fresh hit"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_coalesce() {
        let cache = cache();
        let Lookup::Miss(guard) = cache.begin("k") else {
            panic!("expected miss");
        };
        let Lookup::Pending(mut rx) = cache.begin("k") else {
            panic!("expected pending");
        };

        guard.complete("shared".to_string());
        assert_eq!(rx.recv().await.unwrap(), Some("shared".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flight_releases_waiters() {
        let cache = cache();
        let Lookup::Miss(guard) = cache.begin("k") else {
            panic!("expected miss");
        };
        let Lookup::Pending(mut rx) = cache.begin("k") else {
            panic!("expected pending");
        };

        guard.fail();
        assert_eq!(rx.recv().await.unwrap(), None);
        // The key is free again for the next caller.
        assert!(matches!(cache.begin("k"), Lookup::Miss(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_hit_hands_out_single_refresh() {
        let cache = cache();
        let Lookup::Miss(guard) = cache.begin("k") else {
            panic!("expected miss");
        };
        guard.complete("old".to_string());

        tokio::time::advance(Duration::from_secs(10)).await;

        let Lookup::StaleRefresh(value, guard) = cache.begin("k") else {
            panic!("expected stale refresh");
        };
        assert_eq!(value, "old");

        // Concurrent callers keep getting the stale value, not a second refresh.
        match cache.begin("k") {
            Lookup::Stale(value) => assert_eq!(value, "old"),
            _ => panic!("expected stale"),
        }

        guard.complete("new".to_string());
        match cache.begin("k") {
            Lookup::Fresh(value) => assert_eq!(value, "new"),
            _ => panic!("expected fresh after refresh"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_restores_previous_value() {
        let cache = cache();
        let Lookup::Miss(guard) = cache.begin("k") else {
            panic!("expected miss");
        };
        guard.complete("old".to_string());

        tokio::time::advance(Duration::from_secs(10)).await;
        let Lookup::StaleRefresh(_, guard) = cache.begin("k") else {
            panic!("expected stale refresh");
        };
        guard.fail();

        // Still serveable (stale) rather than lost.
        match cache.begin("k") {
            Lookup::StaleRefresh(value, guard) => {
                assert_eq!(value, "old");
                guard.fail();
            },
            other => {
                let kind = match other {
                    Lookup::Fresh(_) => "fresh",
                    Lookup::Stale(_) => "stale",
                    Lookup::Pending(_) => "pending",
                    Lookup::Miss(_) => "miss",
                    Lookup::StaleRefresh(..) => unreachable!(),
                };
                panic!("expected stale refresh, got {kind}");
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_past_stale_window_is_miss() {
        let cache = cache();
        let Lookup::Miss(guard) = cache.begin("k") else {
            panic!("expected miss");
        };
        guard.complete("v".to_string());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(cache.begin("k"), Lookup::Miss(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_where_prefix() {
        let cache = cache();
        cache.insert("movements:p1:a", "x".to_string());
        cache.insert("movements:p1:b", "y".to_string());
        cache.insert("movements:p2:a", "z".to_string());

        let removed = cache.invalidate_where(|key| key.starts_with("movements:p1:"));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired_skips_in_flight() {
        let cache = cache();
        cache.insert("done", "v".to_string());
        let Lookup::Miss(_guard) = cache.begin("running") else {
            panic!("expected miss");
        };

        tokio::time::advance(Duration::from_secs(120)).await;
        let removed = cache.evict_expired();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
    }
}
