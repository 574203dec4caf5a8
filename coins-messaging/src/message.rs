//! Message envelope for pub/sub

use crate::types::MessageType;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message ID (UUIDv7 for ordering)
    pub id: Uuid,

    /// Node that published the message
    pub origin: Uuid,

    /// Message type
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Payload (JSON)
    pub payload: serde_json::Value,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Create new envelope
    pub fn new(origin: Uuid, message_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            origin,
            message_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create envelope from a typed payload
    pub fn encode<T: Serialize>(
        origin: Uuid,
        message_type: MessageType,
        payload: &T,
    ) -> crate::Result<Self> {
        Ok(Self::new(origin, message_type, serde_json::to_value(payload)?))
    }

    /// Decode the payload into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Whether this node published the message
    pub fn is_echo_for(&self, node_id: Uuid) -> bool {
        self.origin == node_id
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Full subject for this envelope under a channel prefix
    pub fn subject(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.message_type.subject_segment())
    }
}
