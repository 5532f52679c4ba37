use crate::bucket::BucketKey;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A shared store of integer counters keyed by [`BucketKey`].
///
/// This is the only shared mutable resource a generator touches. The
/// implementations may be remote (Redis) or in-process, but every method
/// except [`exists`](CounterStore::exists) and [`ttl`](CounterStore::ttl)
/// must be atomic with respect to other callers of the same key.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Checks whether a live (unexpired) counter exists under `key`.
    async fn exists(&self, key: &BucketKey) -> Result<bool>;

    /// Creates the counter with `value` and an expiry of `ttl`.
    ///
    /// It is not an error if the key already exists; the existing counter is
    /// left untouched. This call is not atomic with a preceding
    /// [`exists`](CounterStore::exists).
    async fn set_if_absent_with_ttl(&self, key: &BucketKey, value: i64, ttl: Duration)
        -> Result<()>;

    /// Atomically adds `step` to the counter and returns the new value.
    ///
    /// Returns `Err(MissingKey)` if the counter does not exist.
    async fn increment_by(&self, key: &BucketKey, step: i64) -> Result<i64>;

    /// Creates the counter with `seed` and `ttl` if it is absent, otherwise
    /// adds `delta` to it, as one atomic step.
    ///
    /// Returns `seed` when the counter was created and the new value when it
    /// was incremented.
    async fn set_or_increment(
        &self,
        key: &BucketKey,
        seed: i64,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64>;

    /// Remaining lifetime of the counter.
    ///
    /// Returns `Ok(None)` if the key is absent or carries no expiry.
    async fn ttl(&self, key: &BucketKey) -> Result<Option<Duration>>;
}

#[async_trait]
impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    async fn exists(&self, key: &BucketKey) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &BucketKey,
        value: i64,
        ttl: Duration,
    ) -> Result<()> {
        (**self).set_if_absent_with_ttl(key, value, ttl).await
    }

    async fn increment_by(&self, key: &BucketKey, step: i64) -> Result<i64> {
        (**self).increment_by(key, step).await
    }

    async fn set_or_increment(
        &self,
        key: &BucketKey,
        seed: i64,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64> {
        (**self).set_or_increment(key, seed, delta, ttl).await
    }

    async fn ttl(&self, key: &BucketKey) -> Result<Option<Duration>> {
        (**self).ttl(key).await
    }
}
