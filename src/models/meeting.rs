use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a mentorship meeting.
///
/// `scheduled -> in-progress -> completed`, with `cancelled` reachable from
/// both non-terminal states. `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeetingStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Scheduled => "scheduled",
            MeetingStatus::InProgress => "in-progress",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MeetingStatus::Completed | MeetingStatus::Cancelled)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(&self, next: MeetingStatus) -> bool {
        use MeetingStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Scheduled, InProgress) | (Scheduled, Completed) | (Scheduled, Cancelled) => true,
            (InProgress, Completed) | (InProgress, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A booked mentorship session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    /// The mentor the session was booked with.
    pub organizer: String,
    /// Learners attending. Always contains the booking user.
    pub participants: Vec<String>,
    pub subject: String,
    pub description: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub meeting_link: String,
    /// Calendar event id, `mock-event-*` when the provider was unavailable.
    pub external_id: Option<String>,
    pub status: MeetingStatus,
    pub rating: Option<u8>,
    pub feedback: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    pub fn is_party(&self, user_id: &str) -> bool {
        self.organizer == user_id || self.participants.iter().any(|p| p == user_id)
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.status == MeetingStatus::Scheduled && self.scheduled_at > now
    }

    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at < now
    }
}

/// Meeting as returned to HTTP callers, with the derived time views.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingView {
    #[serde(flatten)]
    pub meeting: Meeting,
    pub is_upcoming: bool,
    pub is_past: bool,
}

impl From<Meeting> for MeetingView {
    fn from(meeting: Meeting) -> Self {
        let now = Utc::now();
        MeetingView {
            is_upcoming: meeting.is_upcoming(now),
            is_past: meeting.is_past(now),
            meeting,
        }
    }
}

/// POST /api/meetings/create
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMeetingRequest {
    /// User id or mentor-profile id of the mentor.
    pub mentor_id: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration: Option<u32>,
    /// Extra learners for group sessions.
    #[serde(default)]
    pub participants: Vec<String>,
}

/// PUT /api/meetings/{id}
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeetingRequest {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration: Option<u32>,
}

/// POST /api/meetings/{id}/complete
#[derive(Debug, Default, Deserialize)]
pub struct CompleteMeetingRequest {
    pub rating: Option<u8>,
    pub feedback: Option<String>,
    pub notes: Option<String>,
}

/// Query string of GET /api/meetings
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MeetingFilter {
    pub status: Option<MeetingStatus>,
    #[serde(default)]
    pub upcoming: bool,
}
