use crate::error::{ConfigError, GenerateError, Result};
use crate::format::SerialCodeTemplate;
use crate::settings::{AllocationMode, GeneratorSettings};
use crate::Generator;
use async_trait::async_trait;
use jiff::tz::TimeZone;
use jiff::{SignedDuration, Timestamp};
use std::future::Future;
use std::num::NonZeroU64;
use std::time::Duration;
use tally_core::{bucket_key, window_bounds, BucketKey, Clock, CounterStore, SerialCode, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Hands out serial codes from per-window counters held in a [`CounterStore`].
///
/// Each call reads the clock once, derives the bucket key for the current
/// window, takes the next counter value from the store and renders it with
/// the compiled template. The generator itself holds no mutable state, so a
/// single instance can be shared across tasks.
pub struct SerialCodeGenerator<S, C = SystemClock> {
    store: S,
    clock: C,
    key_prefix: String,
    reset_period_ms: NonZeroU64,
    initial_value: i64,
    step: i64,
    ttl: Duration,
    mode: AllocationMode,
    template: SerialCodeTemplate,
    time_zone: TimeZone,
    timeout: Option<Duration>,
}

impl<S: CounterStore> SerialCodeGenerator<S, SystemClock> {
    /// Creates a generator backed by the real system clock.
    pub fn new(settings: GeneratorSettings, store: S) -> std::result::Result<Self, ConfigError> {
        Self::with_clock(settings, store, SystemClock)
    }
}

fn reset_period_ms(period: Duration) -> std::result::Result<NonZeroU64, ConfigError> {
    if period.subsec_nanos() % 1_000_000 != 0 {
        return Err(ConfigError::InvalidResetPeriod(format!(
            "{period:?} is not a whole number of milliseconds"
        )));
    }
    u64::try_from(period.as_millis())
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or_else(|| {
            ConfigError::InvalidResetPeriod(format!("{period:?} must be at least 1ms"))
        })
}

/// Counter lifetime for one window.
///
/// A key created at `now` must be able to expire at `now + ttl`, so the
/// result is bounded by the supported timestamp range. That range ends in
/// year 9999, well inside what Redis accepts for `PX`.
fn counter_ttl(
    reset_period_ms: NonZeroU64,
    coefficient: f64,
    now: Timestamp,
) -> std::result::Result<Duration, ConfigError> {
    if !coefficient.is_finite() || coefficient <= 0.0 {
        return Err(ConfigError::InvalidTimeoutCoefficient(coefficient));
    }
    let ttl_ms = (reset_period_ms.get() as f64 * coefficient).ceil();
    // i64::MAX is not representable as f64; the cast rounds it up to 2^63
    if !(1.0..i64::MAX as f64).contains(&ttl_ms) {
        return Err(ConfigError::InvalidTtl(format!(
            "{reset_period_ms}ms x {coefficient} gives {ttl_ms}ms"
        )));
    }
    let ttl_ms = ttl_ms as i64;
    now.checked_add(SignedDuration::from_millis(ttl_ms))
        .map_err(|e| {
            ConfigError::InvalidTtl(format!(
                "{ttl_ms}ms from {now} is past the supported time range: {e}"
            ))
        })?;
    Ok(Duration::from_millis(ttl_ms as u64))
}

impl<S: CounterStore, C: Clock> SerialCodeGenerator<S, C> {
    /// Creates a generator that reads time from `clock`.
    ///
    /// All settings are validated and the template is compiled here, so a
    /// generator that was built successfully can only fail at the store.
    pub fn with_clock(
        settings: GeneratorSettings,
        store: S,
        clock: C,
    ) -> std::result::Result<Self, ConfigError> {
        let reset_period_ms = reset_period_ms(settings.reset_period)?;
        if settings.step <= 0 {
            return Err(ConfigError::InvalidStep(settings.step));
        }
        let ttl = counter_ttl(reset_period_ms, settings.timeout_coefficient, clock.now())?;
        let template = SerialCodeTemplate::parse(&settings.serial_code_format)?;

        if settings.mode == AllocationMode::Legacy {
            warn!(
                key_prefix = %settings.key_prefix,
                "Legacy allocation mode can hand out the initial value twice per window"
            );
        }

        Ok(Self {
            store,
            clock,
            key_prefix: settings.key_prefix,
            reset_period_ms,
            initial_value: settings.initial_value,
            step: settings.step,
            ttl,
            mode: settings.mode,
            template,
            time_zone: settings.time_zone,
            timeout: settings.timeout,
        })
    }

    /// Lifetime given to every counter key.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The store key of the window containing `now`.
    pub fn key_at(&self, now: Timestamp) -> BucketKey {
        bucket_key(now, &self.key_prefix, self.reset_period_ms)
    }

    /// Generates one serial code, honouring the configured default timeout.
    pub async fn generate(&self) -> Result<SerialCode> {
        match self.timeout {
            Some(timeout) => self.generate_with_timeout(timeout).await,
            None => self.next_code().await,
        }
    }

    /// Generates one serial code, giving up after `timeout`.
    pub async fn generate_with_timeout(&self, timeout: Duration) -> Result<SerialCode> {
        with_deadline(timeout, self.next_code()).await
    }

    /// Generates one serial code unless `token` is cancelled first.
    pub async fn generate_cancellable(&self, token: &CancellationToken) -> Result<SerialCode> {
        until_cancelled(token, self.generate()).await
    }

    /// Generates `count` serial codes, honouring the configured default
    /// timeout for the whole batch.
    pub async fn batch_generate(&self, count: usize) -> Result<Vec<SerialCode>> {
        match self.timeout {
            Some(timeout) => self.batch_generate_with_timeout(count, timeout).await,
            None => self.next_codes(count).await,
        }
    }

    pub async fn batch_generate_with_timeout(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<SerialCode>> {
        with_deadline(timeout, self.next_codes(count)).await
    }

    pub async fn batch_generate_cancellable(
        &self,
        count: usize,
        token: &CancellationToken,
    ) -> Result<Vec<SerialCode>> {
        until_cancelled(token, self.batch_generate(count)).await
    }

    async fn next_code(&self) -> Result<SerialCode> {
        let now = self.clock.now();
        let key = self.key_at(now);

        let index = match self.mode {
            AllocationMode::Atomic => {
                let index = self
                    .store
                    .set_or_increment(&key, self.initial_value, self.step, self.ttl)
                    .await
                    .inspect_err(|e| warn!(key = %key, error = %e, "Failed to allocate counter"))?;
                if index == self.initial_value {
                    self.log_window_opened(&key, now);
                }
                index
            }
            AllocationMode::Legacy => self.legacy_next(&key, now).await?,
        };

        trace!(key = %key, index, "Allocated counter value");
        Ok(self.template.render(index, now, &self.time_zone))
    }

    async fn legacy_next(&self, key: &BucketKey, now: Timestamp) -> Result<i64> {
        let exists = self
            .store
            .exists(key)
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "Failed to check counter"))?;

        if exists {
            let index = self
                .store
                .increment_by(key, self.step)
                .await
                .inspect_err(|e| warn!(key = %key, error = %e, "Failed to increment counter"))?;
            return Ok(index);
        }

        // another caller may be creating the same key right now
        self.store
            .set_if_absent_with_ttl(key, self.initial_value, self.ttl)
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "Failed to create counter"))?;
        self.log_window_opened(key, now);
        Ok(self.initial_value)
    }

    async fn next_codes(&self, count: usize) -> Result<Vec<SerialCode>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        if self.mode == AllocationMode::Legacy {
            let mut codes = Vec::with_capacity(count);
            for _ in 0..count {
                codes.push(self.next_code().await?);
            }
            return Ok(codes);
        }

        let now = self.clock.now();
        let key = self.key_at(now);

        let overflow = || {
            GenerateError::Overflow(format!(
                "reserving {count} values of step {} from {}",
                self.step, self.initial_value
            ))
        };
        let count_i64 = i64::try_from(count).map_err(|_| overflow())?;
        let span = (count_i64 - 1).checked_mul(self.step).ok_or_else(overflow)?;
        let seed = self.initial_value.checked_add(span).ok_or_else(overflow)?;
        let delta = count_i64.checked_mul(self.step).ok_or_else(overflow)?;

        let last = self
            .store
            .set_or_increment(&key, seed, delta, self.ttl)
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "Failed to reserve counter range"))?;
        let first = last.checked_sub(span).ok_or_else(overflow)?;

        if first == self.initial_value {
            self.log_window_opened(&key, now);
        }
        debug!(key = %key, first, last, count, "Reserved counter range");

        // first + span == last, so no intermediate value can overflow
        Ok((0..count_i64)
            .map(|i| self.template.render(first + i * self.step, now, &self.time_zone))
            .collect())
    }

    fn log_window_opened(&self, key: &BucketKey, now: Timestamp) {
        let window = window_bounds(now, self.reset_period_ms);
        debug!(
            key = %key,
            window_start_ms = window.start,
            window_end_ms = window.end,
            ttl_ms = self.ttl.as_millis() as u64,
            "Opened counter window"
        );
    }
}

async fn with_deadline<T>(
    timeout: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| {
            warn!(timeout_ms = timeout.as_millis() as u64, "Serial code generation timed out");
            GenerateError::Timeout(timeout)
        })?
}

async fn until_cancelled<T>(
    token: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("Serial code generation cancelled");
            Err(GenerateError::Cancelled)
        }
        result = future => result,
    }
}

#[async_trait]
impl<S, C> Generator for SerialCodeGenerator<S, C>
where
    S: CounterStore,
    C: Clock + 'static,
{
    async fn generate(&self) -> Result<SerialCode> {
        SerialCodeGenerator::generate(self).await
    }

    async fn batch_generate(&self, count: usize) -> Result<Vec<SerialCode>> {
        SerialCodeGenerator::batch_generate(self, count).await
    }
}
