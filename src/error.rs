//! Error types for tmt-event

use crate::types::Event;
use thiserror::Error;

/// Errors that can occur in the event service
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// An event key, prefix, or name was built from malformed parts
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// A key, prefix, or subsystem string could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Backend connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend rejected or failed a write
    #[error("Failed to publish event to '{key}': {reason}")]
    Publish {
        key: String,
        reason: String,
    },

    /// Backend could not start listening for a subscription
    #[error("Failed to set up subscription for '{target}': {reason}")]
    SubscriptionSetup {
        target: String,
        reason: String,
    },

    /// Encoding or decoding of an event payload failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream/topic creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The connection was shut down
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Any other backend error
    #[error("Store error: {0}")]
    Store(String),
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        EventError::Serialization(e.to_string())
    }
}

/// Result type alias for event operations
pub type Result<T> = std::result::Result<T, EventError>;

/// A publish that did not make it to the backend
///
/// Carries the event that failed together with the cause, so callers
/// can decide whether to retry.
#[derive(Debug, Clone, Error)]
#[error("Publish of event {} failed: {cause}", .event.id)]
pub struct PublishFailure {
    /// The event that could not be published
    pub event: Event,

    /// The underlying backend error
    #[source]
    pub cause: EventError,
}

impl PublishFailure {
    /// Pair an event with the error that rejected it
    pub fn new(event: Event, cause: EventError) -> Self {
        Self { event, cause }
    }
}

impl From<PublishFailure> for EventError {
    fn from(failure: PublishFailure) -> Self {
        failure.cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventCategory, EventKey};

    #[test]
    fn test_publish_failure_display() {
        let event = Event::new(EventKey::parse("tcs.mount.azimuth").unwrap(), EventCategory::System);
        let failure = PublishFailure::new(
            event.clone(),
            EventError::Closed("memory store connection is shut down".to_string()),
        );
        let message = failure.to_string();
        assert!(message.contains(&event.id));
        assert!(message.contains("Connection closed"));

        let cause: EventError = failure.into();
        assert!(matches!(cause, EventError::Closed(_)));
    }

    #[test]
    fn test_from_serde_json() {
        let err: EventError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, EventError::Serialization(_)));
    }
}
