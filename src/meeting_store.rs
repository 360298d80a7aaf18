use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::Collection;
use serde::{Deserialize, Serialize};

use crate::db::{MongoDB, MEETINGS};
use crate::error::CoreError;
use crate::models::{Meeting, MeetingFilter, MeetingStatus};

/// Durable meeting records. Meetings are never deleted.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn insert(&self, meeting: &Meeting) -> Result<(), CoreError>;

    async fn get(&self, id: &str) -> Result<Option<Meeting>, CoreError>;

    /// Replaces the stored record with the same id, but only while its status
    /// is still `expected`. Returns `false` when another writer moved the
    /// status first; the stored record is then left untouched.
    async fn save(&self, meeting: &Meeting, expected: MeetingStatus) -> Result<bool, CoreError>;

    /// Meetings where `viewer` is a party. Upcoming listings come soonest
    /// first, everything else latest first.
    async fn list_for(
        &self,
        viewer: &str,
        filter: &MeetingFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Meeting>, CoreError>;
}

fn to_bson_time(t: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(t.timestamp_millis())
}

fn from_bson_time(t: BsonDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(t.timestamp_millis()).unwrap_or_default()
}

#[derive(Debug, Serialize, Deserialize)]
struct MeetingDocument {
    #[serde(rename = "_id")]
    id: String,
    organizer: String,
    participants: Vec<String>,
    subject: String,
    description: Option<String>,
    scheduled_at: BsonDateTime,
    duration_minutes: i64,
    meeting_link: String,
    external_id: Option<String>,
    status: MeetingStatus,
    rating: Option<i32>,
    feedback: Option<String>,
    notes: Option<String>,
    created_at: BsonDateTime,
    updated_at: BsonDateTime,
}

impl From<&Meeting> for MeetingDocument {
    fn from(m: &Meeting) -> Self {
        MeetingDocument {
            id: m.id.clone(),
            organizer: m.organizer.clone(),
            participants: m.participants.clone(),
            subject: m.subject.clone(),
            description: m.description.clone(),
            scheduled_at: to_bson_time(m.scheduled_at),
            duration_minutes: i64::from(m.duration_minutes),
            meeting_link: m.meeting_link.clone(),
            external_id: m.external_id.clone(),
            status: m.status,
            rating: m.rating.map(i32::from),
            feedback: m.feedback.clone(),
            notes: m.notes.clone(),
            created_at: to_bson_time(m.created_at),
            updated_at: to_bson_time(m.updated_at),
        }
    }
}

impl From<MeetingDocument> for Meeting {
    fn from(d: MeetingDocument) -> Self {
        Meeting {
            id: d.id,
            organizer: d.organizer,
            participants: d.participants,
            subject: d.subject,
            description: d.description,
            scheduled_at: from_bson_time(d.scheduled_at),
            duration_minutes: u32::try_from(d.duration_minutes).unwrap_or_default(),
            meeting_link: d.meeting_link,
            external_id: d.external_id,
            status: d.status,
            rating: d.rating.and_then(|r| u8::try_from(r).ok()),
            feedback: d.feedback,
            notes: d.notes,
            created_at: from_bson_time(d.created_at),
            updated_at: from_bson_time(d.updated_at),
        }
    }
}

pub struct MongoMeetingStore {
    collection: Collection<MeetingDocument>,
}

impl MongoMeetingStore {
    pub fn new(mongodb: &MongoDB) -> Self {
        MongoMeetingStore {
            collection: mongodb.db.collection::<MeetingDocument>(MEETINGS),
        }
    }
}

#[async_trait]
impl MeetingStore for MongoMeetingStore {
    async fn insert(&self, meeting: &Meeting) -> Result<(), CoreError> {
        self.collection.insert_one(MeetingDocument::from(meeting)).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Meeting>, CoreError> {
        let found = self.collection.find_one(doc! { "_id": id }).await?;
        Ok(found.map(Meeting::from))
    }

    async fn save(&self, meeting: &Meeting, expected: MeetingStatus) -> Result<bool, CoreError> {
        let res = self
            .collection
            .replace_one(
                doc! { "_id": meeting.id.as_str(), "status": expected.as_str() },
                MeetingDocument::from(meeting),
            )
            .await?;
        if res.matched_count > 0 {
            return Ok(true);
        }
        match self.collection.find_one(doc! { "_id": meeting.id.as_str() }).await? {
            Some(_) => Ok(false),
            None => Err(CoreError::NotFound("meeting".into())),
        }
    }

    async fn list_for(
        &self,
        viewer: &str,
        filter: &MeetingFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Meeting>, CoreError> {
        let mut query = doc! {
            "$or": [
                { "organizer": viewer },
                { "participants": viewer },
            ]
        };
        let sort = if filter.upcoming {
            query.insert("scheduled_at", doc! { "$gte": to_bson_time(now) });
            query.insert("status", MeetingStatus::Scheduled.as_str());
            doc! { "scheduled_at": 1 }
        } else {
            if let Some(status) = filter.status {
                query.insert("status", status.as_str());
            }
            doc! { "scheduled_at": -1 }
        };

        let docs: Vec<MeetingDocument> = self
            .collection
            .find(query)
            .sort(sort)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(Meeting::from).collect())
    }
}

/// Process-local meeting records, used by the `memory` backend and in tests.
#[derive(Default)]
pub struct InMemoryMeetingStore {
    meetings: RwLock<HashMap<String, Meeting>>,
}

impl InMemoryMeetingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MeetingStore for InMemoryMeetingStore {
    async fn insert(&self, meeting: &Meeting) -> Result<(), CoreError> {
        let mut meetings = self
            .meetings
            .write()
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        if meetings.contains_key(&meeting.id) {
            return Err(CoreError::Storage(format!("duplicate meeting id {}", meeting.id)));
        }
        meetings.insert(meeting.id.clone(), meeting.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Meeting>, CoreError> {
        let meetings = self
            .meetings
            .read()
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(meetings.get(id).cloned())
    }

    async fn save(&self, meeting: &Meeting, expected: MeetingStatus) -> Result<bool, CoreError> {
        let mut meetings = self
            .meetings
            .write()
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        match meetings.get_mut(&meeting.id) {
            Some(stored) if stored.status != expected => Ok(false),
            Some(stored) => {
                *stored = meeting.clone();
                Ok(true)
            }
            None => Err(CoreError::NotFound("meeting".into())),
        }
    }

    async fn list_for(
        &self,
        viewer: &str,
        filter: &MeetingFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Meeting>, CoreError> {
        let meetings = self
            .meetings
            .read()
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        let mut found: Vec<Meeting> = meetings
            .values()
            .filter(|m| m.is_party(viewer))
            .filter(|m| {
                if filter.upcoming {
                    m.status == MeetingStatus::Scheduled && m.scheduled_at >= now
                } else {
                    filter.status.map_or(true, |s| m.status == s)
                }
            })
            .cloned()
            .collect();

        if filter.upcoming {
            found.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then_with(|| a.id.cmp(&b.id)));
        } else {
            found.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at).then_with(|| a.id.cmp(&b.id)));
        }
        Ok(found)
    }
}
