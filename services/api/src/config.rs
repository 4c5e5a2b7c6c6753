//! API service configuration
//!
//! Read from `API_*` environment variables, e.g. `API_BIND_ADDRESS`,
//! `API_STORAGE` (`postgres` or `memory`) and `API_EXPIRY_SCHEDULE`.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Where sessions are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// Single process only; sessions are lost on restart
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    pub bind_address: String,
    pub storage: StorageBackend,
    /// Cron schedule of the stale session sweep (seconds field included)
    pub expiry_schedule: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("bind_address", "0.0.0.0:3001")?
            .set_default("storage", "postgres")?
            .set_default("expiry_schedule", "0 * * * * *")?
            .add_source(
                Environment::with_prefix("API")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
