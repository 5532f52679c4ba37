//! Counter store backends for Tally.
//!
//! [`MemoryCounterStore`] keeps counters in-process and is meant for tests
//! and single-node use. [`RedisCounterStore`] shares counters between any
//! number of processes through a Redis-compatible server.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;
pub use tally_core::{CounterStore, StoreError};
