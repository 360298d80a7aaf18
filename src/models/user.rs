use serde::{Deserialize, Serialize};

/// Stable identity of a platform user, as far as the session core needs it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub user_id: String,
    pub name: String,
    /// Used as the calendar attendee identity.
    pub email: String,
}
