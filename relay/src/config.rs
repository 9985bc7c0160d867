//! Environment configuration for the relay binary.

use thiserror::Error;

/// Errors while reading the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

/// Relay configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Broker bootstrap list (`BOOTSTRAP_SERVERS`).
    pub bootstrap_servers: String,
    /// The shared topic (`ORDERS_TOPIC`, default `orders`).
    pub orders_topic: String,
    /// Consumer group (`GROUP_ID`, default `status-relay`).
    pub group_id: String,
    /// Redis connection URL (`REDIS_URL`).
    pub redis_url: String,
}

impl Config {
    /// Read the configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when `BOOTSTRAP_SERVERS` or
    /// `REDIS_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bootstrap_servers: std::env::var("BOOTSTRAP_SERVERS")
                .map_err(|_| ConfigError::Missing("BOOTSTRAP_SERVERS"))?,
            orders_topic: std::env::var("ORDERS_TOPIC").unwrap_or_else(|_| "orders".to_string()),
            group_id: std::env::var("GROUP_ID").unwrap_or_else(|_| "status-relay".to_string()),
            redis_url: std::env::var("REDIS_URL")
                .map_err(|_| ConfigError::Missing("REDIS_URL"))?,
        })
    }
}
