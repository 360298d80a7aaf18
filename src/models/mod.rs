pub mod meeting;
pub mod message;
pub mod user;

pub use meeting::{
    BookMeetingRequest, CompleteMeetingRequest, Meeting, MeetingFilter, MeetingStatus,
    MeetingView, UpdateMeetingRequest,
};
pub use message::{ChatPayload, Message};
pub use user::UserRecord;
