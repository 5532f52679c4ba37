use thiserror::Error;

/// Result type for counter store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store operation timed out: {0}")]
    Timeout(String),
    #[error("counter key does not exist: {0}")]
    MissingKey(String),
    #[error("counter value is invalid: {0}")]
    InvalidData(String),
    #[error("counter store initialization failed: {0}")]
    Initialization(String),
    #[error("counter store operation failed: {0}")]
    Operation(String),
}
