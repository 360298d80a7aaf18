use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::Collection;
use serde::{Deserialize, Serialize};

use crate::db::{MongoDB, MESSAGES};
use crate::error::CoreError;
use crate::models::Message;

/// Upper bound on a single history read.
pub const HISTORY_LIMIT: usize = 50;

/// Append-only log of chat messages keyed by room.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: &Message) -> Result<(), CoreError>;

    /// The latest `limit` messages of `room` (capped at [`HISTORY_LIMIT`]),
    /// oldest first.
    async fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>, CoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageDocument {
    #[serde(rename = "_id")]
    id: String,
    room: String,
    sender: String,
    sender_name: String,
    message: String,
    time: String,
    created_at: BsonDateTime,
}

impl From<&Message> for MessageDocument {
    fn from(m: &Message) -> Self {
        MessageDocument {
            id: m.id.clone(),
            room: m.room.clone(),
            sender: m.sender.clone(),
            sender_name: m.sender_name.clone(),
            message: m.body.clone(),
            time: m.time.clone(),
            created_at: BsonDateTime::from_millis(m.created_at.timestamp_millis()),
        }
    }
}

impl From<MessageDocument> for Message {
    fn from(d: MessageDocument) -> Self {
        Message {
            id: d.id,
            room: d.room,
            sender: d.sender,
            sender_name: d.sender_name,
            body: d.message,
            time: d.time,
            created_at: DateTime::<Utc>::from_timestamp_millis(d.created_at.timestamp_millis())
                .unwrap_or_default(),
        }
    }
}

pub struct MongoMessageStore {
    collection: Collection<MessageDocument>,
}

impl MongoMessageStore {
    pub fn new(mongodb: &MongoDB) -> Self {
        MongoMessageStore {
            collection: mongodb.db.collection::<MessageDocument>(MESSAGES),
        }
    }
}

#[async_trait]
impl MessageStore for MongoMessageStore {
    async fn append(&self, message: &Message) -> Result<(), CoreError> {
        self.collection.insert_one(MessageDocument::from(message)).await?;
        Ok(())
    }

    async fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>, CoreError> {
        let limit = limit.min(HISTORY_LIMIT) as i64;
        // v7 ids break ties between messages written in the same millisecond.
        let newest_first: Vec<MessageDocument> = self
            .collection
            .find(doc! { "room": room })
            .sort(doc! { "created_at": -1, "_id": -1 })
            .limit(limit)
            .await?
            .try_collect()
            .await?;

        Ok(newest_first.into_iter().rev().map(Message::from).collect())
    }
}

/// Process-local message log, used by the `memory` backend and in tests.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: &Message) -> Result<(), CoreError> {
        self.messages
            .write()
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .push(message.clone());
        Ok(())
    }

    async fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>, CoreError> {
        let limit = limit.min(HISTORY_LIMIT);
        let messages = self
            .messages
            .read()
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        // Stable sort keeps insertion order for equal timestamps.
        let mut in_room: Vec<Message> = messages.iter().filter(|m| m.room == room).cloned().collect();
        in_room.sort_by_key(|m| m.created_at);
        let skip = in_room.len().saturating_sub(limit);
        Ok(in_room.into_iter().skip(skip).collect())
    }
}
