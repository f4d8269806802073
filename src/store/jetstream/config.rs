//! NATS JetStream store configuration

use crate::types::EventKey;
use serde::{Deserialize, Serialize};

/// Storage backend for the JetStream stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

/// NATS JetStream connection and stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JetStreamConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    #[serde(default = "default_url")]
    pub url: String,

    /// JetStream stream name
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Subject prefix; event key `k` lives on subject `<prefix>.k`
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Messages retained per subject; 1 keeps only the current value
    #[serde(default = "default_max_messages_per_subject")]
    pub max_messages_per_subject: i64,

    #[serde(default)]
    pub storage: StorageType,

    /// Reject encoded events larger than this many bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload_bytes: Option<usize>,

    /// Authentication token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_stream_name() -> String {
    "EVENTS".to_string()
}

fn default_subject_prefix() -> String {
    "events".to_string()
}

fn default_max_messages_per_subject() -> i64 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for JetStreamConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            subject_prefix: default_subject_prefix(),
            max_messages_per_subject: default_max_messages_per_subject(),
            storage: StorageType::default(),
            max_payload_bytes: None,
            token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl JetStreamConfig {
    /// Subjects captured by the stream
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.>", self.subject_prefix)]
    }

    /// Subject carrying `key`
    pub fn subject_for(&self, key: &EventKey) -> String {
        format!("{}.{}", self.subject_prefix, key)
    }

    /// Key carried on `subject`, if the subject belongs to this stream
    pub fn key_for(&self, subject: &str) -> Option<EventKey> {
        let key = subject
            .strip_prefix(self.subject_prefix.as_str())?
            .strip_prefix('.')?;
        EventKey::parse(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JetStreamConfig::default();
        assert_eq!(config.url, "nats://127.0.0.1:4222");
        assert_eq!(config.max_messages_per_subject, 1);
        assert_eq!(config.storage, StorageType::File);
        assert_eq!(config.stream_subjects(), vec!["events.>".to_string()]);
    }

    #[test]
    fn test_subject_mapping() {
        let config = JetStreamConfig {
            subject_prefix: "tmt.events".to_string(),
            ..Default::default()
        };
        let key = EventKey::parse("wfos.red.detector.filterWheel").unwrap();
        let subject = config.subject_for(&key);
        assert_eq!(subject, "tmt.events.wfos.red.detector.filterWheel");
        assert_eq!(config.key_for(&subject), Some(key));
        assert_eq!(config.key_for("other.wfos.red.detector.filterWheel"), None);
    }

    #[test]
    fn test_deserialize() {
        let config: JetStreamConfig =
            serde_json::from_str(r#"{"stream_name": "OBS", "storage": "memory"}"#).unwrap();
        assert_eq!(config.stream_name, "OBS");
        assert_eq!(config.storage, StorageType::Memory);
        assert_eq!(config.subject_prefix, "events");
    }
}
