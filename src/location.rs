//! Backend location lookup
//!
//! The event service only needs a host and port for its backend, resolved
//! once when the service is built. Discovery itself lives elsewhere; this
//! module defines the seam and a static table for tests and fixed
//! deployments.

use crate::error::{EventError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Where a backend server listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub host: String,
    pub port: u16,
}

impl Location {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves a service name to a backend location
#[async_trait]
pub trait LocationResolver: Send + Sync {
    /// Fails with `EventError::Connection` when the service is unknown
    async fn resolve(&self, service: &str) -> Result<Location>;
}

/// Fixed service table
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    locations: HashMap<String, Location>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` at `location`, replacing any earlier entry
    pub fn with(mut self, service: impl Into<String>, location: Location) -> Self {
        self.locations.insert(service.into(), location);
        self
    }
}

#[async_trait]
impl LocationResolver for StaticResolver {
    async fn resolve(&self, service: &str) -> Result<Location> {
        self.locations.get(service).cloned().ok_or_else(|| {
            EventError::Connection(format!("No location registered for service '{}'", service))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new().with("event-server", Location::new("10.0.0.5", 6379));
        let location = assert_ok!(resolver.resolve("event-server").await);
        assert_eq!(location, Location::new("10.0.0.5", 6379));
        assert_eq!(location.to_string(), "10.0.0.5:6379");
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let resolver = StaticResolver::new();
        let err = assert_err!(resolver.resolve("event-server").await);
        assert!(matches!(err, EventError::Connection(_)));
    }
}
