use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::gateway::{ConferencingGateway, EventUpdate, ProvisionRequest};
use crate::meeting_store::MeetingStore;
use crate::models::{
    BookMeetingRequest, CompleteMeetingRequest, Meeting, MeetingFilter, MeetingStatus,
    UpdateMeetingRequest, UserRecord,
};
use crate::user_directory::UserDirectory;

const COMMIT_ATTEMPTS: usize = 3;

/// Drives the meeting lifecycle. Every meeting mutation goes through here.
pub struct MeetingCoordinator {
    meetings: Arc<dyn MeetingStore>,
    users: Arc<dyn UserDirectory>,
    gateway: Arc<ConferencingGateway>,
}

/// A start time must lie in `(now, now + 1 month]`.
pub fn check_window(start: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), CoreError> {
    if start <= now {
        return Err(CoreError::InvalidWindow(
            "Meeting date cannot be in the past".to_string(),
        ));
    }
    let limit = now.checked_add_months(Months::new(1)).unwrap_or(now);
    if start > limit {
        return Err(CoreError::InvalidWindow(
            "You can only book meetings within a one-month time limit from today.".to_string(),
        ));
    }
    Ok(())
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, CoreError> {
    value.ok_or_else(|| CoreError::InvalidInput(format!("{field} is required")))
}

fn non_blank(value: &str, field: &str) -> Result<String, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn positive_duration(duration: u32) -> Result<u32, CoreError> {
    if duration == 0 {
        return Err(CoreError::InvalidInput("duration must be positive".to_string()));
    }
    Ok(duration)
}

fn transition(meeting: &mut Meeting, next: MeetingStatus) -> Result<(), CoreError> {
    if !meeting.status.can_transition_to(next) {
        return Err(CoreError::InvalidState(meeting.status.to_string()));
    }
    meeting.status = next;
    Ok(())
}

impl MeetingCoordinator {
    pub fn new(
        meetings: Arc<dyn MeetingStore>,
        users: Arc<dyn UserDirectory>,
        gateway: Arc<ConferencingGateway>,
    ) -> Self {
        MeetingCoordinator { meetings, users, gateway }
    }

    async fn resolve(&self, reference: &str, what: &str) -> Result<UserRecord, CoreError> {
        self.users
            .resolve(reference)
            .await?
            .ok_or_else(|| CoreError::NotFound(what.to_string()))
    }

    /// Loads a meeting the viewer is a party of.
    async fn authorize(&self, meeting_id: &str, viewer: &str) -> Result<Meeting, CoreError> {
        let meeting = self
            .meetings
            .get(meeting_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Meeting".to_string()))?;
        if !meeting.is_party(viewer) {
            return Err(CoreError::AccessDenied);
        }
        Ok(meeting)
    }

    pub async fn book(&self, caller: &str, req: BookMeetingRequest) -> Result<Meeting, CoreError> {
        let mentor_ref = non_blank(&required(req.mentor_id, "mentorId")?, "mentorId")?;
        let subject = non_blank(&required(req.subject, "subject")?, "subject")?;
        let scheduled_at = required(req.scheduled_at, "scheduledAt")?;
        let duration = positive_duration(required(req.duration, "duration")?)?;
        let description = req
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let now = Utc::now();
        check_window(scheduled_at, now)?;

        let organizer = self.resolve(&mentor_ref, "Mentor").await?;
        let learner = self.resolve(caller, "User").await?;
        if learner.user_id == organizer.user_id {
            return Err(CoreError::InvalidInput(
                "mentors cannot book a session with themselves".to_string(),
            ));
        }

        let mut attendees = vec![organizer.clone(), learner];
        for extra in &req.participants {
            let user = self.resolve(extra, "Participant").await?;
            if !attendees.iter().any(|a| a.user_id == user.user_id) {
                attendees.push(user);
            }
        }

        let resource = self
            .gateway
            .provision(&ProvisionRequest {
                subject: subject.clone(),
                description: description.clone(),
                start: scheduled_at,
                duration_minutes: duration,
                attendees: attendees.iter().map(|a| a.email.clone()).collect(),
            })
            .await;

        let meeting = Meeting {
            id: Uuid::new_v4().to_string(),
            organizer: organizer.user_id.clone(),
            participants: attendees
                .iter()
                .skip(1)
                .map(|a| a.user_id.clone())
                .filter(|id| *id != organizer.user_id)
                .collect(),
            subject,
            description,
            scheduled_at,
            duration_minutes: duration,
            meeting_link: resource.join_link.clone(),
            external_id: Some(resource.external_id.clone()),
            status: MeetingStatus::Scheduled,
            rating: None,
            feedback: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.meetings.insert(&meeting).await {
            if !resource.degraded {
                warn!(
                    "Calendar event {} leaked: meeting could not be stored: {}",
                    resource.external_id, e
                );
            }
            return Err(e);
        }

        info!(
            "Meeting {} booked by {} with {} ({}) at {}",
            meeting.id, caller, organizer.name, meeting.organizer, meeting.scheduled_at
        );
        Ok(meeting)
    }

    pub async fn list(&self, viewer: &str, filter: MeetingFilter) -> Result<Vec<Meeting>, CoreError> {
        self.meetings.list_for(viewer, &filter, Utc::now()).await
    }

    pub async fn get(&self, meeting_id: &str, viewer: &str) -> Result<Meeting, CoreError> {
        self.authorize(meeting_id, viewer).await
    }

    /// Applies `change` to the meeting and stores it, provided its status was
    /// not moved by another request in the meantime. On such a race the
    /// meeting is reloaded and `change` runs again on the fresh record.
    async fn commit<F>(&self, mut meeting: Meeting, change: F) -> Result<Meeting, CoreError>
    where
        F: Fn(&mut Meeting) -> Result<(), CoreError>,
    {
        for _ in 0..COMMIT_ATTEMPTS {
            let expected = meeting.status;
            let mut next = meeting.clone();
            change(&mut next)?;
            next.updated_at = Utc::now();
            if self.meetings.save(&next, expected).await? {
                return Ok(next);
            }
            meeting = self
                .meetings
                .get(&next.id)
                .await?
                .ok_or_else(|| CoreError::NotFound("Meeting".to_string()))?;
            debug!(
                "Meeting {} moved to {} concurrently, reapplying change",
                meeting.id, meeting.status
            );
        }
        Err(CoreError::InvalidState(meeting.status.to_string()))
    }

    pub async fn update(
        &self,
        meeting_id: &str,
        viewer: &str,
        req: UpdateMeetingRequest,
    ) -> Result<Meeting, CoreError> {
        let meeting = self.authorize(meeting_id, viewer).await?;
        if meeting.status.is_terminal() {
            return Err(CoreError::InvalidState(meeting.status.to_string()));
        }

        let subject = req.subject.as_deref().map(|s| non_blank(s, "subject")).transpose()?;
        let duration = req.duration.map(positive_duration).transpose()?;
        if let Some(at) = req.scheduled_at {
            check_window(at, Utc::now())?;
        }
        let description = req
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let apply = |m: &mut Meeting| -> Result<(), CoreError> {
            if m.status.is_terminal() {
                return Err(CoreError::InvalidState(m.status.to_string()));
            }
            if let Some(subject) = &subject {
                m.subject = subject.clone();
            }
            if let Some(description) = &description {
                m.description = Some(description.clone());
            }
            if let Some(at) = req.scheduled_at {
                m.scheduled_at = at;
            }
            if let Some(duration) = duration {
                m.duration_minutes = duration;
            }
            Ok(())
        };

        if let Some(external_id) = meeting.external_id.as_deref() {
            let mut preview = meeting.clone();
            apply(&mut preview)?;
            let update = EventUpdate {
                subject: preview.subject,
                description: preview.description,
                start: preview.scheduled_at,
                duration_minutes: preview.duration_minutes,
            };
            if let Err(e) = self.gateway.reschedule(external_id, &update).await {
                warn!("Could not reschedule calendar event {}: {}", external_id, e);
            }
        }

        self.commit(meeting, apply).await
    }

    /// Cancelling always succeeds locally, whatever the calendar says.
    pub async fn cancel(&self, meeting_id: &str, viewer: &str) -> Result<Meeting, CoreError> {
        let meeting = self.authorize(meeting_id, viewer).await?;
        if meeting.status == MeetingStatus::Cancelled {
            return Ok(meeting);
        }
        if meeting.status == MeetingStatus::Completed {
            return Err(CoreError::InvalidState(meeting.status.to_string()));
        }

        if let Some(external_id) = meeting.external_id.as_deref() {
            if let Err(e) = self.gateway.cancel(external_id).await {
                warn!("Could not cancel calendar event {}: {}", external_id, e);
            }
        }

        let meeting = self
            .commit(meeting, |m| transition(m, MeetingStatus::Cancelled))
            .await?;
        info!("Meeting {} cancelled by {}", meeting.id, viewer);
        Ok(meeting)
    }

    /// Marks the meeting in progress on first join. Later joins only return it.
    pub async fn join(&self, meeting_id: &str, viewer: &str) -> Result<Meeting, CoreError> {
        let meeting = self.authorize(meeting_id, viewer).await?;
        match meeting.status {
            MeetingStatus::Scheduled => {
                self.commit(meeting, |m| match m.status {
                    MeetingStatus::Scheduled => transition(m, MeetingStatus::InProgress),
                    MeetingStatus::InProgress | MeetingStatus::Completed => Ok(()),
                    MeetingStatus::Cancelled => Err(CoreError::InvalidState(m.status.to_string())),
                })
                .await
            }
            MeetingStatus::InProgress | MeetingStatus::Completed => Ok(meeting),
            MeetingStatus::Cancelled => Err(CoreError::InvalidState(meeting.status.to_string())),
        }
    }

    /// Completion is accepted straight from `scheduled` as well.
    pub async fn complete(
        &self,
        meeting_id: &str,
        viewer: &str,
        req: CompleteMeetingRequest,
    ) -> Result<Meeting, CoreError> {
        if let Some(rating) = req.rating {
            if !(1..=5).contains(&rating) {
                return Err(CoreError::InvalidInput("rating must be between 1 and 5".to_string()));
            }
        }
        let feedback = req.feedback.filter(|f| !f.trim().is_empty());
        let notes = req.notes.filter(|n| !n.trim().is_empty());

        let meeting = self.authorize(meeting_id, viewer).await?;
        self.commit(meeting, |m| {
            transition(m, MeetingStatus::Completed)?;
            if req.rating.is_some() {
                m.rating = req.rating;
            }
            if let Some(feedback) = &feedback {
                m.feedback = Some(feedback.clone());
            }
            if let Some(notes) = &notes {
                m.notes = Some(notes.clone());
            }
            Ok(())
        })
        .await
    }
}
