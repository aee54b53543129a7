//! Command line and environment configuration for the server binary.

use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("host must not be empty")]
    EmptyHost,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server IP address to bind to
    #[arg(short = 'H', long, env = "GATHER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, env = "GATHER_PORT", default_value = "8080")]
    pub port: u16,

    /// SQLite database file; players live in memory when omitted
    #[arg(short, long, env = "DATABASE_PATH")]
    pub database: Option<PathBuf>,

    /// Outbound messages buffered per connection before it is evicted
    #[arg(short, long, default_value = "16")]
    pub queue_capacity: usize,

    /// Seed for spawn colours and positions
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["gather-server"]).unwrap();
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.seed, None);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_explicit_arguments() {
        let config = Config::try_parse_from([
            "gather-server",
            "--host",
            "0.0.0.0",
            "--port",
            "9001",
            "--database",
            "world.db",
            "--queue-capacity",
            "4",
            "--seed",
            "7",
        ])
        .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:9001");
        assert_eq!(config.database, Some(PathBuf::from("world.db")));
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config =
            Config::try_parse_from(["gather-server", "--queue-capacity", "0", "--host", "::1"])
                .unwrap();
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueCapacity));
    }

    #[test]
    fn test_invalid_port_is_a_parse_error() {
        assert!(Config::try_parse_from(["gather-server", "--port", "70000"]).is_err());
    }
}
