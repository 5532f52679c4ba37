//! Time-bucketed serial code generation.
//!
//! A [`SerialCodeGenerator`] splits time into fixed windows, keeps one
//! counter per window in a [`CounterStore`](tally_core::CounterStore) and
//! renders each counter value through a printf-style
//! [`SerialCodeTemplate`]. Counters restart at the configured initial value
//! whenever a new window begins and are reclaimed by the store's TTL.

pub mod error;
pub mod format;
pub mod generator;
pub mod settings;

pub use error::{ConfigError, GenerateError, TemplateError};
pub use format::SerialCodeTemplate;
pub use generator::SerialCodeGenerator;
pub use settings::{AllocationMode, GeneratorConfig, GeneratorSettings};

use async_trait::async_trait;
use tally_core::SerialCode;

/// Trait for producing serial codes.
///
/// Implementations can vary from counter-store backed generators to purely
/// local sequences; callers only see codes or a [`GenerateError`].
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Generates the next serial code.
    async fn generate(&self) -> Result<SerialCode, GenerateError>;

    /// Generates `count` serial codes in order.
    ///
    /// The default implementation calls [`generate`](Generator::generate)
    /// once per code.
    async fn batch_generate(&self, count: usize) -> Result<Vec<SerialCode>, GenerateError> {
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            codes.push(self.generate().await?);
        }
        Ok(codes)
    }
}
