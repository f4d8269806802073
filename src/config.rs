//! Event service configuration
//!
//! Loaded once at construction, usually from TOML:
//!
//! ```toml
//! service_name = "event-server"
//!
//! [backend]
//! type = "redis"
//! url = "redis://event-server:6379"
//! ```

use crate::error::{EventError, Result};
use crate::store::{JetStreamConfig, MemoryConfig, RedisConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which backend to connect to, with its settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory(MemoryConfig),
    Redis(RedisConfig),
    Jetstream(JetStreamConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory(MemoryConfig::default())
    }
}

impl BackendConfig {
    /// Backend name as used in logs and `EventStore::name`
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Memory(_) => "memory",
            BackendConfig::Redis(_) => "redis",
            BackendConfig::Jetstream(_) => "jetstream",
        }
    }
}

/// Top-level event service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventServiceConfig {
    /// Service name looked up through a `LocationResolver`; the backend's
    /// own URL is used when no resolver is given
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_service_name() -> String {
    "event-server".to_string()
}

impl Default for EventServiceConfig {
    fn default() -> Self {
        Self::with_backend(BackendConfig::default())
    }
}

impl EventServiceConfig {
    pub fn memory() -> Self {
        Self::with_backend(BackendConfig::Memory(MemoryConfig::default()))
    }

    pub fn redis(config: RedisConfig) -> Self {
        Self::with_backend(BackendConfig::Redis(config))
    }

    pub fn jetstream(config: JetStreamConfig) -> Self {
        Self::with_backend(BackendConfig::Jetstream(config))
    }

    fn with_backend(backend: BackendConfig) -> Self {
        Self {
            service_name: default_service_name(),
            backend,
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EventError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EventError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EventError::Config(format!("Failed to serialize configuration: {}", e)))
    }
}
