//! Core types and traits for Tally, the time-bucketed serial code generator.
//!
//! This crate provides the contracts shared by the generator and the
//! counter store backends: the clock, bucket key derivation, the counter
//! store trait and the serial code value type.

pub mod bucket;
pub mod clock;
pub mod error;
pub mod serial_code;
pub mod store;

pub use bucket::{bucket_index, bucket_key, window_bounds, BucketKey};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use serial_code::SerialCode;
pub use store::CounterStore;
