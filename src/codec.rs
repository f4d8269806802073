//! Event payload codec
//!
//! Events travel as JSON bytes on every backend. The engine never looks
//! inside the payload; it only encodes on publish and decodes on
//! delivery.

use crate::error::{EventError, Result};
use crate::types::Event;
use bytes::Bytes;

/// Encode an event for the wire
pub fn encode(event: &Event) -> Result<Bytes> {
    let payload = serde_json::to_vec(event)?;
    Ok(Bytes::from(payload))
}

/// Decode an event received from a backend
pub fn decode(payload: &[u8]) -> Result<Event> {
    serde_json::from_slice(payload)
        .map_err(|e| EventError::Serialization(format!("Failed to decode event: {}", e)))
}

/// Reject payloads above a configured limit before they reach the backend
pub(crate) fn check_size(event: &Event, payload: &[u8], max_payload_bytes: Option<usize>) -> Result<()> {
    match max_payload_bytes {
        Some(max) if payload.len() > max => Err(EventError::Publish {
            key: event.key.to_string(),
            reason: format!(
                "payload of {} bytes exceeds the maximum of {} bytes",
                payload.len(),
                max
            ),
        }),
        _ => Ok(()),
    }
}
