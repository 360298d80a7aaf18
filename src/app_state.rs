use std::sync::Arc;

use actix::Addr;

use crate::chat_server::ChatServer;
use crate::coordinator::MeetingCoordinator;
use crate::message_store::MessageStore;

#[derive(Clone)]
pub struct AppState {
    pub chat_server: Addr<ChatServer>,
    pub coordinator: Arc<MeetingCoordinator>,
    pub messages: Arc<dyn MessageStore>,
}
