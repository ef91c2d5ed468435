//! Server configuration from environment variables.

use courier_core::{defaults, Error, Result};
use courier_delivery::WorkerConfig;

/// Complete configuration for the courier server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// PostgreSQL connection string (store and job queue).
    pub database_url: String,
    /// Listening port for the connection-accepting transport.
    pub sockets_port: u16,
    /// Delivery worker settings.
    pub worker: WorkerConfig,
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_URL` | required | Postgres connection string |
    /// | `SOCKETS_PORT` | `5000` | Transport listening port |
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Poll interval when queue is empty |
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Config("DATABASE_URL must be set".to_string()))?;
        let sockets_port = parse_port(std::env::var("SOCKETS_PORT").ok())?;

        Ok(Self {
            database_url,
            sockets_port,
            worker: WorkerConfig::from_env(),
        })
    }
}

/// Parse the transport port, falling back to the default when unset.
pub fn parse_port(raw: Option<String>) -> Result<u16> {
    match raw {
        None => Ok(defaults::SOCKETS_PORT),
        Some(value) => value
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("SOCKETS_PORT is not a valid port: {value}"))),
    }
}
