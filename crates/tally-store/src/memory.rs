use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use jiff::{SignedDuration, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tally_core::error::Result;
use tally_core::{BucketKey, Clock, CounterStore, StoreError, SystemClock};
use tracing::{debug, trace};

/// Counter creations between two sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 64;

/// In-memory storage entry for one counter.
#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expire_at: Timestamp,
}

impl Entry {
    fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expire_at
    }
}

/// In-memory implementation of [`CounterStore`] using DashMap.
///
/// Every operation on a key runs under that key's shard lock, so
/// `increment_by` and `set_or_increment` are atomic per key. Expiry is
/// driven by the injected [`Clock`]: an entry stops being visible once the
/// clock reaches its expiry instant. Expired entries are dropped on the next
/// access to their key, and every `sweep_interval` counter creations the
/// whole map is swept, so windows that are never touched again are still
/// reclaimed.
#[derive(Debug)]
pub struct MemoryCounterStore<C = SystemClock> {
    entries: DashMap<String, Entry>,
    clock: C,
    sweep_interval: u64,
    creations: AtomicU64,
}

impl MemoryCounterStore<SystemClock> {
    /// Creates a store that expires entries by the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryCounterStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryCounterStore<C> {
    /// Creates a store that expires entries by `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            creations: AtomicU64::new(0),
        }
    }

    /// Sweeps expired entries every `interval` counter creations.
    ///
    /// An interval of zero is treated as one.
    pub fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.sweep_interval = interval.max(1);
        self
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn expire_at(&self, now: Timestamp, ttl: Duration) -> Result<Timestamp> {
        let ttl = SignedDuration::try_from(ttl)
            .map_err(|e| StoreError::Operation(format!("ttl out of range: {e}")))?;
        now.checked_add(ttl)
            .map_err(|e| StoreError::Operation(format!("expiry out of range: {e}")))
    }

    fn remove_if_expired(&self, key: &str, now: Timestamp) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    /// Must be called without holding any entry guard: `retain` locks every
    /// shard.
    fn counter_created(&self) {
        let created = self.creations.fetch_add(1, Ordering::Relaxed) + 1;
        if created % self.sweep_interval == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = self.entries.len(), "Swept expired counters");
            }
        }
    }
}

fn add(key: &BucketKey, value: i64, delta: i64) -> Result<i64> {
    value.checked_add(delta).ok_or_else(|| {
        StoreError::InvalidData(format!("counter '{key}' would overflow adding {delta}"))
    })
}

#[async_trait]
impl<C: Clock + 'static> CounterStore for MemoryCounterStore<C> {
    async fn exists(&self, key: &BucketKey) -> Result<bool> {
        let now = self.clock.now();

        let Some(entry) = self.entries.get(key.as_str()) else {
            return Ok(false);
        };

        if entry.is_expired(now) {
            drop(entry);
            self.remove_if_expired(key.as_str(), now);
            return Ok(false);
        }

        Ok(true)
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &BucketKey,
        value: i64,
        ttl: Duration,
    ) -> Result<()> {
        let now = self.clock.now();
        let fresh = Entry {
            value,
            expire_at: self.expire_at(now, ttl)?,
        };

        let created = match self.entries.entry(key.as_str().to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                let expired = occupied.get().is_expired(now);
                if expired {
                    occupied.insert(fresh);
                    trace!(key = %key, value, "Replaced expired counter");
                }
                expired
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(fresh);
                trace!(key = %key, value, "Created counter");
                true
            }
        };

        if created {
            self.counter_created();
        }
        Ok(())
    }

    async fn increment_by(&self, key: &BucketKey, step: i64) -> Result<i64> {
        let now = self.clock.now();

        if let Some(mut entry) = self.entries.get_mut(key.as_str()) {
            if !entry.is_expired(now) {
                entry.value = add(key, entry.value, step)?;
                return Ok(entry.value);
            }
        }

        self.remove_if_expired(key.as_str(), now);
        Err(StoreError::MissingKey(key.to_string()))
    }

    async fn set_or_increment(
        &self,
        key: &BucketKey,
        seed: i64,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64> {
        let now = self.clock.now();

        match self.entries.entry(key.as_str().to_owned()) {
            MapEntry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let entry = occupied.get_mut();
                entry.value = add(key, entry.value, delta)?;
                return Ok(entry.value);
            }
            MapEntry::Occupied(mut occupied) => {
                occupied.insert(Entry {
                    value: seed,
                    expire_at: self.expire_at(now, ttl)?,
                });
                trace!(key = %key, seed, "Replaced expired counter");
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: seed,
                    expire_at: self.expire_at(now, ttl)?,
                });
                trace!(key = %key, seed, "Created counter");
            }
        }

        self.counter_created();
        Ok(seed)
    }

    async fn ttl(&self, key: &BucketKey) -> Result<Option<Duration>> {
        let now = self.clock.now();

        let Some(entry) = self.entries.get(key.as_str()) else {
            return Ok(None);
        };

        if entry.is_expired(now) {
            drop(entry);
            self.remove_if_expired(key.as_str(), now);
            return Ok(None);
        }

        let remaining = entry.expire_at.as_millisecond() - now.as_millisecond();
        Ok(Some(Duration::from_millis(remaining.max(0) as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tally_core::ManualClock;

    fn key(s: &str) -> BucketKey {
        BucketKey::new_unchecked(s)
    }

    fn store_at(millis: i64) -> (MemoryCounterStore<ManualClock>, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_millisecond(millis).unwrap());
        (MemoryCounterStore::with_clock(clock.clone()), clock)
    }

    const TTL: Duration = Duration::from_millis(1_500);

    #[tokio::test]
    async fn set_then_increment() {
        let (store, _clock) = store_at(0);
        let k = key("ord-0");

        assert!(!store.exists(&k).await.unwrap());
        store.set_if_absent_with_ttl(&k, 10, TTL).await.unwrap();
        assert!(store.exists(&k).await.unwrap());

        assert_eq!(store.increment_by(&k, 1).await.unwrap(), 11);
        assert_eq!(store.increment_by(&k, 5).await.unwrap(), 16);
    }

    #[tokio::test]
    async fn set_if_absent_keeps_existing_value() {
        let (store, _clock) = store_at(0);
        let k = key("ord-0");

        store.set_if_absent_with_ttl(&k, 0, TTL).await.unwrap();
        store.increment_by(&k, 3).await.unwrap();
        store.set_if_absent_with_ttl(&k, 0, TTL).await.unwrap();

        assert_eq!(store.increment_by(&k, 1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn increment_missing_key_fails() {
        let (store, _clock) = store_at(0);
        let err = store.increment_by(&key("nope"), 1).await.unwrap_err();
        assert_eq!(err, StoreError::MissingKey("nope".to_string()));
    }

    #[tokio::test]
    async fn set_or_increment_seeds_then_adds() {
        let (store, _clock) = store_at(0);
        let k = key("ord-0");

        assert_eq!(store.set_or_increment(&k, 7, 2, TTL).await.unwrap(), 7);
        assert_eq!(store.set_or_increment(&k, 7, 2, TTL).await.unwrap(), 9);
        assert_eq!(store.set_or_increment(&k, 7, 2, TTL).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (store, clock) = store_at(0);
        let k = key("ord-0");
        store.set_if_absent_with_ttl(&k, 0, TTL).await.unwrap();

        clock.advance(SignedDuration::from_millis(1_499));
        assert!(store.exists(&k).await.unwrap());
        assert_eq!(
            store.ttl(&k).await.unwrap(),
            Some(Duration::from_millis(1))
        );

        clock.advance(SignedDuration::from_millis(1));
        assert!(!store.exists(&k).await.unwrap());
        assert_eq!(store.ttl(&k).await.unwrap(), None);
        assert!(matches!(
            store.increment_by(&k, 1).await,
            Err(StoreError::MissingKey(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn expired_entry_is_reseeded() {
        let (store, clock) = store_at(0);
        let k = key("ord-0");

        store.set_or_increment(&k, 0, 1, TTL).await.unwrap();
        store.set_or_increment(&k, 0, 1, TTL).await.unwrap();
        clock.advance(SignedDuration::from_secs(2));

        assert_eq!(store.set_or_increment(&k, 0, 1, TTL).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let (store, clock) = store_at(0);
        store
            .set_if_absent_with_ttl(&key("short"), 0, Duration::from_millis(100))
            .await
            .unwrap();
        store
            .set_if_absent_with_ttl(&key("long"), 0, Duration::from_secs(10))
            .await
            .unwrap();

        clock.advance(SignedDuration::from_secs(1));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.exists(&key("long")).await.unwrap());
    }

    #[tokio::test]
    async fn abandoned_windows_are_swept() {
        let (store, clock) = store_at(0);
        let store = store.with_sweep_interval(16);
        let ttl = Duration::from_millis(2);

        // one key per 1ms window, each abandoned once the clock moves on
        for window in 0..10_000 {
            store
                .set_or_increment(&key(&format!("w-{window}")), 0, 1, ttl)
                .await
                .unwrap();
            clock.advance(SignedDuration::from_millis(1));
            assert!(store.len() <= 16 + 2, "len={}", store.len());
        }

        clock.advance(SignedDuration::from_hours(1));
        for window in 0..16 {
            store
                .set_if_absent_with_ttl(&key(&format!("late-{window}")), 0, ttl)
                .await
                .unwrap();
        }
        // the 16th creation sweeps every abandoned window
        assert_eq!(store.len(), 16);
    }

    #[tokio::test]
    async fn overflow_is_reported() {
        let (store, _clock) = store_at(0);
        let k = key("big");
        store.set_if_absent_with_ttl(&k, i64::MAX, TTL).await.unwrap();

        let err = store.increment_by(&k, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_set_or_increment_hands_out_distinct_values() {
        let (store, _clock) = store_at(0);
        let store = Arc::new(store);
        let k = key("ord-0");

        let mut handles = vec![];
        for _ in 0..64 {
            let store = Arc::clone(&store);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                store.set_or_increment(&k, 0, 1, TTL).await.unwrap()
            }));
        }

        let mut values = vec![];
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();

        assert_eq!(values, (0..64).collect::<Vec<_>>());
    }
}
