use crate::error::ConfigError;
use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_INITIAL_VALUE: i64 = 0;
pub const DEFAULT_STEP: i64 = 1;
pub const DEFAULT_TIMEOUT_COEFFICIENT: f64 = 1.5;

/// How a generator turns one request into counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMode {
    /// One `set_or_increment` round-trip per request.
    #[default]
    Atomic,
    /// `exists`, then `set_if_absent_with_ttl` or `increment_by`.
    ///
    /// Two callers that both see a missing bucket will both receive the
    /// initial value. Kept for stores that cannot offer the atomic form.
    Legacy,
}

impl Display for AllocationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationMode::Atomic => write!(f, "atomic"),
            AllocationMode::Legacy => write!(f, "legacy"),
        }
    }
}

/// Configures a serial code generator instance.
///
/// Settings are checked when the generator is built; see
/// [`SerialCodeGenerator::new`](crate::SerialCodeGenerator::new).
#[derive(Debug, Clone, TypedBuilder)]
pub struct GeneratorSettings {
    /// Prepended to the bucket index to form the store key.
    #[builder(setter(into))]
    pub key_prefix: String,
    /// Printf-style template, see [`crate::format`].
    #[builder(setter(into))]
    pub serial_code_format: String,
    /// Length of one counter window. Must be a positive whole number of
    /// milliseconds.
    pub reset_period: Duration,
    /// First value handed out in every window.
    #[builder(default = DEFAULT_INITIAL_VALUE)]
    pub initial_value: i64,
    /// Distance between consecutive values in a window.
    #[builder(default = DEFAULT_STEP)]
    pub step: i64,
    /// Counter keys live for `reset_period * timeout_coefficient`.
    #[builder(default = DEFAULT_TIMEOUT_COEFFICIENT)]
    pub timeout_coefficient: f64,
    #[builder(default)]
    pub mode: AllocationMode,
    /// Zone used to render date/time fields.
    #[builder(default = TimeZone::UTC)]
    pub time_zone: TimeZone,
    /// Deadline applied to `generate` and `batch_generate`.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
}

/// Plain-data form of [`GeneratorSettings`], for config files and
/// environment-driven setups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    pub key_prefix: String,
    pub serial_code_format: String,
    pub reset_period_ms: u64,
    #[serde(default = "default_initial_value")]
    pub initial_value: i64,
    #[serde(default = "default_step")]
    pub step: i64,
    #[serde(default = "default_timeout_coefficient")]
    pub timeout_coefficient: f64,
    #[serde(default)]
    pub mode: AllocationMode,
    /// IANA name such as `Asia/Shanghai`. UTC when absent.
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_initial_value() -> i64 {
    DEFAULT_INITIAL_VALUE
}

fn default_step() -> i64 {
    DEFAULT_STEP
}

fn default_timeout_coefficient() -> f64 {
    DEFAULT_TIMEOUT_COEFFICIENT
}

impl GeneratorConfig {
    /// Resolves the time zone and converts to builder-ready settings.
    ///
    /// Everything else is validated by the generator itself.
    pub fn into_settings(self) -> Result<GeneratorSettings, ConfigError> {
        let time_zone = match self.time_zone.as_deref() {
            None => TimeZone::UTC,
            Some(name) => TimeZone::get(name)
                .map_err(|e| ConfigError::InvalidTimeZone(format!("{name}: {e}")))?,
        };

        Ok(GeneratorSettings {
            key_prefix: self.key_prefix,
            serial_code_format: self.serial_code_format,
            reset_period: Duration::from_millis(self.reset_period_ms),
            initial_value: self.initial_value,
            step: self.step,
            timeout_coefficient: self.timeout_coefficient,
            mode: self.mode,
            time_zone,
            timeout: self.timeout_ms.map(Duration::from_millis),
        })
    }
}
