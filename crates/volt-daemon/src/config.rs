//! Configuration for the volthaus daemon.

use serde::{Deserialize, Serialize};
use volt_policy::PolicyConfig;
use volt_scheduler::SchedulerConfig;

/// Main daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Maintenance job schedules
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Access-rule strings, compiled once at startup
    #[serde(default)]
    pub policies: PolicyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Fixture seeding
    #[serde(default)]
    pub seed: SeedConfig,
}

/// Storage configuration. The record store proper is an external service;
/// the daemon only ever hosts the in-memory reference adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (development/testing)
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Fixture seeding configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    /// Seed the stock mission and bazaar fixtures on startup
    #[serde(default)]
    pub fixtures: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then an optional file, then
    /// `VOLT_`-prefixed environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VOLT")
                .separator("_")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_memory_backed() {
        let config = DaemonConfig::default();
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.logging.level, "info");
        assert!(!config.seed.fixtures);
    }

    #[test]
    fn default_policies_compile() {
        let config = DaemonConfig::default();
        assert!(volt_policy::AccessPolicies::load(&config.policies).is_ok());
    }
}
