//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod app;
pub mod logging;
pub mod worker;

use serde::{Deserialize, Serialize};

use self::app::ServerConfig;
use self::logging::LoggingConfig;
use self::worker::WorkerConfig;

use crate::error::AppError;
use crate::result::AppResult;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Worker pool and supervisor settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `JOBHUB_`.
    pub fn load(env: &str) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("JOBHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse configuration from an inline TOML document.
    pub fn from_toml(source: &str) -> AppResult<Self> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations the dispatcher cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        self.worker.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_toml("").expect("defaults");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.worker.pools.len(), 1);
        assert_eq!(config.worker.pools[0].name, "studio0");
    }

    #[test]
    fn test_pools_override() {
        let config = AppConfig::from_toml(
            r#"
            [worker]
            freeze_timeout_ms = 2500

            [[worker.pools]]
            name = "studioA"
            queues = ["studioA.studio", "studioA.ingest"]

            [[worker.pools]]
            name = "studioB"
            queues = ["studioB.studio"]
            "#,
        )
        .expect("parse");

        assert_eq!(config.worker.freeze_timeout_ms, 2500);
        assert_eq!(config.worker.pools.len(), 2);
        assert_eq!(config.worker.pools[0].queues.len(), 2);
        assert_eq!(config.worker.pools[1].name, "studioB");
    }

    #[test]
    fn test_duplicate_queue_rejected() {
        let within_pool = AppConfig::from_toml(
            r#"
            [[worker.pools]]
            name = "a"
            queues = ["q", "q"]
            "#,
        );
        assert!(within_pool.is_err());

        let across_pools = AppConfig::from_toml(
            r#"
            [[worker.pools]]
            name = "a"
            queues = ["q"]

            [[worker.pools]]
            name = "b"
            queues = ["r", "q"]
            "#,
        )
        .unwrap_err();
        assert!(across_pools.message.contains("'q'"));
    }

    #[test]
    fn test_pool_without_queues_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [[worker.pools]]
            name = "empty"
            queues = []
            "#,
        );
        assert!(result.is_err());
    }
}
