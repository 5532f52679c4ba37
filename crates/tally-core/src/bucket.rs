use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::num::NonZeroU64;
use std::ops::Range;

/// The store key of one time window's counter.
///
/// Rendered as `prefix ++ floor(epoch_ms / reset_period_ms)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey(String);

impl BucketKey {
    /// Wraps an already rendered key, e.g. one read back from a store.
    pub fn new_unchecked(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Index of the window `[k * period, (k + 1) * period)` that contains `now`.
///
/// Uses floor division, so instants before the Unix epoch fall into negative
/// windows instead of collapsing onto window zero.
pub fn bucket_index(now: Timestamp, reset_period_ms: NonZeroU64) -> i64 {
    let millis = i128::from(now.as_millisecond());
    let period = i128::from(reset_period_ms.get());
    // |millis| < 2^49 and period >= 1, so the quotient always fits an i64
    millis.div_euclid(period) as i64
}

/// Derives the bucket key for `now`.
pub fn bucket_key(now: Timestamp, prefix: &str, reset_period_ms: NonZeroU64) -> BucketKey {
    let index = bucket_index(now, reset_period_ms);
    BucketKey(format!("{prefix}{index}"))
}

/// Epoch millisecond bounds of the window containing `now`.
pub fn window_bounds(now: Timestamp, reset_period_ms: NonZeroU64) -> Range<i64> {
    let period = i64::try_from(reset_period_ms.get()).unwrap_or(i64::MAX);
    let start = bucket_index(now, reset_period_ms).saturating_mul(period);
    start..start.saturating_add(period)
}
