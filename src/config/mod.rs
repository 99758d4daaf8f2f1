//! Application configuration.
//!
//! Aggregates per-subsystem sections into a single [`Config`] loaded from an
//! optional YAML file plus `STAMPEDE_`-prefixed environment variables.

mod database;
mod queue;

pub use database::{DatabaseConfig, RedisConfig};
pub use queue::QueueSettings;

use serde::Deserialize;

/// Environment variable holding the tracing filter (e.g. `info`, `stampede=debug`).
pub const LOG_ENV_VAR: &str = "STAMPEDE_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PostgreSQL configuration.
    pub database: DatabaseConfig,
    /// Redis configuration (inventory engine and order queue share a server).
    pub redis: RedisConfig,
    /// Order queue tuning.
    pub queue: QueueSettings,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overrides earlier:
    /// 1. `config.yaml` in the current directory (if present)
    /// 2. File named by the `STAMPEDE_CONFIG` environment variable (if set)
    /// 3. Environment variables with `STAMPEDE_` prefix (`__` separator,
    ///    e.g. `STAMPEDE__DATABASE__URI` / `STAMPEDE__QUEUE__MAX_RETRY_COUNT`)
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new("config.yaml", FileFormat::Yaml).required(false));

        if let Ok(config_path) = std::env::var("STAMPEDE_CONFIG") {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("STAMPEDE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.database.uri.starts_with("postgres://"));
        assert!(config.redis.url.starts_with("redis://"));
        assert_eq!(config.queue.max_retry_count, 5);
    }
}
