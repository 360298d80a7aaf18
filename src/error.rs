// src/error.rs

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the meeting coordinator, the stores and the room broker.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or malformed fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Booking time outside of the allowed window.
    #[error("{0}")]
    InvalidWindow(String),

    /// Caller is not a party of the meeting.
    #[error("access denied")]
    AccessDenied,

    #[error("{0} not found")]
    NotFound(String),

    /// The requested transition would leave a terminal status.
    #[error("meeting is {0}")]
    InvalidState(String),

    /// The conferencing provider failed and a placeholder was used instead.
    /// Logged, never returned to HTTP callers.
    #[error("external provider degraded: {0}")]
    ExternalDegraded(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<mongodb::error::Error> for CoreError {
    fn from(err: mongodb::error::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl ResponseError for CoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::InvalidInput(_) | CoreError::InvalidWindow(_) => StatusCode::BAD_REQUEST,
            CoreError::AccessDenied => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidState(_) => StatusCode::CONFLICT,
            CoreError::ExternalDegraded(_) => StatusCode::BAD_GATEWAY,
            CoreError::Storage(_) | CoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Storage details stay in the logs.
        let message = match self {
            CoreError::Storage(_) | CoreError::Config(_) => {
                error!("{}", self);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_variants_to_status_codes() {
        assert_eq!(CoreError::InvalidInput("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(CoreError::InvalidWindow("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(CoreError::AccessDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(CoreError::NotFound("meeting".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(CoreError::InvalidState("cancelled".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(CoreError::Storage("boom".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn storage_errors_hide_details() {
        let resp = CoreError::Storage("connection refused on 10.0.0.4".into()).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "success": false, "message": "Internal server error" }));
    }

    #[actix_web::test]
    async fn client_errors_carry_their_message() {
        let resp = CoreError::InvalidState("cancelled".into()).error_response();
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "meeting is cancelled");
    }
}
