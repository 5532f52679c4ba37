use crate::format::Argument;
use std::time::Duration;
use tally_core::StoreError;
use thiserror::Error;

/// A serial code template that cannot be compiled.
///
/// Offsets are byte offsets of the offending `%` in the template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown conversion '{conversion}' at offset {offset}")]
    UnknownConversion { offset: usize, conversion: String },
    #[error("incomplete format specifier at offset {offset}")]
    Truncated { offset: usize },
    #[error("argument index {index} at offset {offset} is out of range; expected 1 (counter) or 2 (timestamp)")]
    ArgumentOutOfRange { offset: usize, index: usize },
    #[error("specifier at offset {offset} cannot format the {argument}")]
    TypeMismatch { offset: usize, argument: Argument },
    #[error("'%<' at offset {offset} has no previous specifier")]
    NoPreviousArgument { offset: usize },
    #[error("invalid flags at offset {offset}: {reason}")]
    InvalidFlags { offset: usize, reason: String },
    #[error("template never renders the counter")]
    CounterNotRendered,
}

/// Rejected generator settings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid reset period: {0}")]
    InvalidResetPeriod(String),
    #[error("step must be positive, got {0}")]
    InvalidStep(i64),
    #[error("timeout coefficient must be finite and positive, got {0}")]
    InvalidTimeoutCoefficient(f64),
    #[error("invalid counter ttl: {0}")]
    InvalidTtl(String),
    #[error("invalid time zone: {0}")]
    InvalidTimeZone(String),
    #[error("invalid serial code format: {0}")]
    Template(#[from] TemplateError),
}

/// The single failure type returned by generation calls.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerateError {
    #[error("counter store failure: {0}")]
    Store(#[from] StoreError),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation was cancelled")]
    Cancelled,
    #[error("counter arithmetic overflowed: {0}")]
    Overflow(String),
}

pub type Result<T, E = GenerateError> = std::result::Result<T, E>;
