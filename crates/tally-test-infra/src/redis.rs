use crate::error::{Result, TestInfraError};
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const REDIS_PORT: u16 = 6379;

/// Settings for a disposable Redis server.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RedisServerConfig {
    /// Tag of the `redis` image to run.
    #[builder(default = "8.6.0".to_string())]
    pub tag: String,

    /// How many times to PING the server before giving up.
    #[builder(default = 20)]
    pub ready_attempts: u32,

    /// Pause between PING attempts.
    #[builder(default = Duration::from_millis(100))]
    pub ready_interval: Duration,
}

impl Default for RedisServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A standalone Redis container that lives as long as this value.
pub struct RedisServer {
    // dropping the handle stops the container
    #[allow(dead_code)]
    container: ContainerAsync<GenericImage>,
    url: String,
}

impl RedisServer {
    /// Starts a Redis container with default settings.
    pub async fn start() -> Result<Self> {
        Self::with_config(RedisServerConfig::default()).await
    }

    /// Starts a Redis container and waits until it answers `PING`.
    pub async fn with_config(config: RedisServerConfig) -> Result<Self> {
        let container = GenericImage::new("redis", config.tag.as_str())
            .with_exposed_port(REDIS_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await?;

        let host = match container.get_host().await?.to_string().as_str() {
            "localhost" => String::from("127.0.0.1"),
            other => other.to_string(),
        };
        let port = container.get_host_port_ipv4(REDIS_PORT).await?;
        let url = format!("redis://{host}:{port}");

        let server = Self { container, url };
        server.wait_ready(&config).await?;
        Ok(server)
    }

    /// Connection URL, e.g. `redis://127.0.0.1:32768`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Opens a fresh multiplexed connection to the server.
    pub async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.url.as_str())?;
        Ok(client.get_multiplexed_async_connection().await?)
    }

    async fn wait_ready(&self, config: &RedisServerConfig) -> Result<()> {
        for _ in 0..config.ready_attempts {
            if let Ok(mut conn) = self.connection().await {
                let pong: redis::RedisResult<String> =
                    redis::cmd("PING").query_async(&mut conn).await;
                if pong.is_ok() {
                    return Ok(());
                }
            }
            tokio::time::sleep(config.ready_interval).await;
        }

        Err(TestInfraError::NotReady {
            address: self.url.clone(),
            attempts: config.ready_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RedisServerConfig::default();
        assert_eq!(config.tag, "8.6.0");
        assert_eq!(config.ready_attempts, 20);
        assert_eq!(config.ready_interval, Duration::from_millis(100));
    }

    #[test]
    fn custom_config() {
        let config = RedisServerConfig::builder()
            .tag("7.4".to_string())
            .ready_attempts(3)
            .build();
        assert_eq!(config.tag, "7.4");
        assert_eq!(config.ready_attempts, 3);
    }
}
