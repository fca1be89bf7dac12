//! Wire units exchanged with the broker

use crate::messaging::error::MessagingResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Message handed to the broker: optional partition key plus JSON payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub key: Option<String>,
    pub value: Vec<u8>,
}

impl OutboundMessage {
    /// Serialize `message` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(message: &T) -> MessagingResult<Self> {
        Ok(Self {
            key: None,
            value: serde_json::to_vec(message)?,
        })
    }

    /// Attach a partition key; same-key messages land on the same partition
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Message as delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp in epoch milliseconds, when the broker set one
    pub timestamp: Option<i64>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl InboundMessage {
    /// Payload bytes, treating an empty payload as missing
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref().filter(|payload| !payload.is_empty())
    }

    /// Delivery metadata passed to handlers
    pub fn metadata(&self) -> DeliveryMetadata {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        DeliveryMetadata {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset.to_string(),
            timestamp: timestamp.to_string(),
        }
    }
}

/// Broker-assigned metadata accompanying every decoded message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: String,
    /// Epoch milliseconds
    pub timestamp: String,
}
