use std::result::Result as StdResult;
use thiserror::Error;

/// Errors raised while provisioning disposable test servers.
#[derive(Debug, Error)]
pub enum TestInfraError {
    #[error("container error: {0}")]
    Container(#[from] testcontainers::TestcontainersError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("server at {address} did not answer PING after {attempts} attempts")]
    NotReady { address: String, attempts: u32 },
}

pub type Result<T> = StdResult<T, TestInfraError>;
