use log::info;
use mongodb::bson::{doc, Document};
use mongodb::{options::ClientOptions, Client, Database, IndexModel};

use crate::error::CoreError;

pub const MEETINGS: &str = "meetings";
pub const MESSAGES: &str = "messages";
pub const USERS: &str = "users";
pub const MENTOR_PROFILES: &str = "mentor_profiles";

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Result<Self, CoreError> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoDB { client, db })
    }

    /// Creates the indexes backing the per-party, per-status and per-room
    /// queries. Idempotent.
    pub async fn ensure_indexes(&self) -> Result<(), CoreError> {
        let meetings = self.db.collection::<Document>(MEETINGS);
        for keys in [
            doc! { "organizer": 1, "scheduled_at": -1 },
            doc! { "participants": 1, "scheduled_at": -1 },
            doc! { "status": 1, "scheduled_at": 1 },
        ] {
            meetings
                .create_index(IndexModel::builder().keys(keys).build())
                .await?;
        }

        self.db
            .collection::<Document>(MESSAGES)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "room": 1, "created_at": 1 })
                    .build(),
            )
            .await?;

        info!("MongoDB indexes ensured on {}", self.db.name());
        Ok(())
    }
}
