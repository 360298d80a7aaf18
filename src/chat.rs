use actix_web::{web, HttpRequest, HttpResponse};
use log::error;

use crate::app_state::AppState;
use crate::auth::{current_user, unauthorized};
use crate::error::CoreError;
use crate::message_store::{MessageStore, HISTORY_LIMIT};

/// GET /api/chat/history/{room}
///
/// Latest messages of the room, oldest first. Read straight from the store,
/// independent of the live broker.
pub async fn get_history(
    req: HttpRequest,
    data: web::Data<AppState>,
    room: web::Path<String>,
) -> Result<HttpResponse, CoreError> {
    if current_user(&req).is_none() {
        return Ok(unauthorized());
    }
    let messages = data
        .messages
        .recent(&room, HISTORY_LIMIT)
        .await
        .inspect_err(|e| error!("Error fetching history for room {}: {}", room, e))?;
    Ok(HttpResponse::Ok().json(messages))
}
