use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::Collection;
use serde::{Deserialize, Serialize};

use crate::db::{MongoDB, MENTOR_PROFILES, USERS};
use crate::error::CoreError;
use crate::models::UserRecord;

/// Read-only view of the platform's users. Account and profile management
/// live elsewhere.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolves a user id, or a mentor-profile id, to the owning user.
    async fn resolve(&self, reference: &str) -> Result<Option<UserRecord>, CoreError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorProfileLink {
    pub profile_id: String,
    pub user_id: String,
}

pub struct MongoUserDirectory {
    users: Collection<UserRecord>,
    profiles: Collection<MentorProfileDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MentorProfileDocument {
    profile_id: String,
    user_id: String,
}

impl MongoUserDirectory {
    pub fn new(mongodb: &MongoDB) -> Self {
        MongoUserDirectory {
            users: mongodb.db.collection::<UserRecord>(USERS),
            profiles: mongodb.db.collection::<MentorProfileDocument>(MENTOR_PROFILES),
        }
    }
}

#[async_trait]
impl UserDirectory for MongoUserDirectory {
    async fn resolve(&self, reference: &str) -> Result<Option<UserRecord>, CoreError> {
        if let Some(user) = self.users.find_one(doc! { "user_id": reference }).await? {
            return Ok(Some(user));
        }
        let Some(profile) = self.profiles.find_one(doc! { "profile_id": reference }).await? else {
            return Ok(None);
        };
        Ok(self.users.find_one(doc! { "user_id": profile.user_id.as_str() }).await?)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedFile {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    mentor_profiles: Vec<MentorProfileLink>,
}

/// Fixed set of users, for the `memory` backend and tests.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: HashMap<String, UserRecord>,
    profiles: HashMap<String, String>,
}

impl InMemoryUserDirectory {
    pub fn new(users: Vec<UserRecord>, mentor_profiles: Vec<MentorProfileLink>) -> Self {
        InMemoryUserDirectory {
            users: users.into_iter().map(|u| (u.user_id.clone(), u)).collect(),
            profiles: mentor_profiles
                .into_iter()
                .map(|p| (p.profile_id, p.user_id))
                .collect(),
        }
    }

    /// Loads `{"users": [...], "mentorProfiles": [...]}`.
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("reading {}: {e}", path.display())))?;
        let seed: SeedFile = serde_json::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(Self::new(seed.users, seed.mentor_profiles))
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve(&self, reference: &str) -> Result<Option<UserRecord>, CoreError> {
        if let Some(user) = self.users.get(reference) {
            return Ok(Some(user.clone()));
        }
        Ok(self
            .profiles
            .get(reference)
            .and_then(|user_id| self.users.get(user_id))
            .cloned())
    }
}
