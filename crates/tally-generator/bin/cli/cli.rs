use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};
use tally_generator::settings::{
    DEFAULT_INITIAL_VALUE, DEFAULT_STEP, DEFAULT_TIMEOUT_COEFFICIENT,
};
use tally_generator::{AllocationMode, GeneratorConfig};

pub const REDIS_URL_ENV: &str = "TALLY_REDIS_URL";
pub const KEY_PREFIX_ENV: &str = "TALLY_KEY_PREFIX";
pub const FORMAT_ENV: &str = "TALLY_FORMAT";
pub const RESET_PERIOD_MS_ENV: &str = "TALLY_RESET_PERIOD_MS";
pub const INITIAL_VALUE_ENV: &str = "TALLY_INITIAL_VALUE";
pub const STEP_ENV: &str = "TALLY_STEP";
pub const TIMEOUT_COEFFICIENT_ENV: &str = "TALLY_TIMEOUT_COEFFICIENT";
pub const MODE_ENV: &str = "TALLY_MODE";
pub const TIME_ZONE_ENV: &str = "TALLY_TIME_ZONE";
pub const TIMEOUT_MS_ENV: &str = "TALLY_TIMEOUT_MS";
pub const COUNT_ENV: &str = "TALLY_COUNT";
pub const LOG_FORMAT_ENV: &str = "TALLY_LOG_FORMAT";

pub const DEFAULT_KEY_PREFIX: &str = "tally:";
pub const DEFAULT_FORMAT: &str = "%2$tY%<tm%<td%1$06d";
pub const DEFAULT_RESET_PERIOD_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    #[value(name = "atomic")]
    Atomic,
    #[value(name = "legacy")]
    Legacy,
}

impl From<ModeArg> for AllocationMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Atomic => AllocationMode::Atomic,
            ModeArg::Legacy => AllocationMode::Legacy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

impl Display for LogFormatArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormatArg::Text => write!(f, "text"),
            LogFormatArg::Json => write!(f, "json"),
        }
    }
}

/// Prints serial codes from a time-bucketed counter.
#[derive(Debug, Parser)]
#[command(name = "tally", version)]
pub struct CLI {
    /// Redis server holding the counters; an in-process store is used when absent.
    #[arg(long, env = REDIS_URL_ENV)]
    pub redis_url: Option<String>,

    #[arg(long, env = KEY_PREFIX_ENV, default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

    /// Template with the counter as argument 1 and the timestamp as argument 2.
    #[arg(long, env = FORMAT_ENV, default_value = DEFAULT_FORMAT)]
    pub format: String,

    #[arg(long, env = RESET_PERIOD_MS_ENV, default_value_t = DEFAULT_RESET_PERIOD_MS)]
    pub reset_period_ms: u64,

    #[arg(
        long,
        env = INITIAL_VALUE_ENV,
        default_value_t = DEFAULT_INITIAL_VALUE,
        allow_negative_numbers = true
    )]
    pub initial_value: i64,

    #[arg(long, env = STEP_ENV, default_value_t = DEFAULT_STEP)]
    pub step: i64,

    #[arg(long, env = TIMEOUT_COEFFICIENT_ENV, default_value_t = DEFAULT_TIMEOUT_COEFFICIENT)]
    pub timeout_coefficient: f64,

    #[arg(long, env = MODE_ENV, value_enum, default_value_t = ModeArg::Atomic)]
    pub mode: ModeArg,

    /// IANA time zone used for date fields.
    #[arg(long, env = TIME_ZONE_ENV)]
    pub time_zone: Option<String>,

    #[arg(long, env = TIMEOUT_MS_ENV)]
    pub timeout_ms: Option<u64>,

    /// Number of codes to print.
    #[arg(short = 'n', long, env = COUNT_ENV, default_value_t = 1)]
    pub count: usize,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

impl CLI {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            key_prefix: self.key_prefix.clone(),
            serial_code_format: self.format.clone(),
            reset_period_ms: self.reset_period_ms,
            initial_value: self.initial_value,
            step: self.step,
            timeout_coefficient: self.timeout_coefficient,
            mode: self.mode.into(),
            time_zone: self.time_zone.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}
