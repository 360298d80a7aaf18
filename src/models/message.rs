// File: message.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// A persisted chat message. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room: String,
    pub sender: String,
    /// Display name at the time of sending.
    pub sender_name: String,
    #[serde(rename = "message")]
    pub body: String,
    /// Client-side display time, e.g. "14:05".
    pub time: String,
    pub created_at: DateTime<Utc>,
}

/// What a client sends over the realtime channel, and what other room
/// members receive back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub room: String,
    pub sender: String,
    #[serde(default)]
    pub sender_name: String,
    pub message: String,
    #[serde(default)]
    pub time: String,
}

impl ChatPayload {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.room.trim().is_empty() {
            return Err(CoreError::InvalidInput("room is required".into()));
        }
        if self.sender.trim().is_empty() {
            return Err(CoreError::InvalidInput("sender is required".into()));
        }
        if self.message.trim().is_empty() {
            return Err(CoreError::InvalidInput("message body is empty".into()));
        }
        Ok(())
    }

    /// Stamps the payload with an id and creation time. Uses a v7 uuid so ids
    /// sort in creation order within the process.
    pub fn into_message(self) -> Message {
        Message {
            id: Uuid::now_v7().to_string(),
            room: self.room,
            sender: self.sender,
            sender_name: self.sender_name,
            body: self.message,
            time: self.time,
            created_at: Utc::now(),
        }
    }
}
