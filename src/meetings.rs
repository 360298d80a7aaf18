use actix_web::{web, HttpRequest, HttpResponse};
use log::debug;
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::{current_user, unauthorized};
use crate::error::CoreError;
use crate::models::{
    BookMeetingRequest, CompleteMeetingRequest, MeetingFilter, MeetingView, UpdateMeetingRequest,
};

/// POST /api/meetings/create
pub async fn create_meeting(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<BookMeetingRequest>,
) -> Result<HttpResponse, CoreError> {
    let Some(user) = current_user(&req) else {
        return Ok(unauthorized());
    };
    let meeting = data.coordinator.book(&user, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Meeting created successfully",
        "meeting": MeetingView::from(meeting),
    })))
}

/// GET /api/meetings?status=&upcoming=
pub async fn list_meetings(
    req: HttpRequest,
    data: web::Data<AppState>,
    filter: web::Query<MeetingFilter>,
) -> Result<HttpResponse, CoreError> {
    let Some(user) = current_user(&req) else {
        return Ok(unauthorized());
    };
    let filter = filter.into_inner();
    debug!("Listing meetings for {} with {:?}", user, filter);
    let meetings: Vec<MeetingView> = data
        .coordinator
        .list(&user, filter)
        .await?
        .into_iter()
        .map(MeetingView::from)
        .collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": meetings.len(),
        "meetings": meetings,
    })))
}

/// GET /api/meetings/{id}
pub async fn get_meeting(
    req: HttpRequest,
    data: web::Data<AppState>,
    meeting_id: web::Path<String>,
) -> Result<HttpResponse, CoreError> {
    let Some(user) = current_user(&req) else {
        return Ok(unauthorized());
    };
    let meeting = data.coordinator.get(&meeting_id, &user).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "meeting": MeetingView::from(meeting),
    })))
}

/// PUT /api/meetings/{id}
pub async fn update_meeting(
    req: HttpRequest,
    data: web::Data<AppState>,
    meeting_id: web::Path<String>,
    body: web::Json<UpdateMeetingRequest>,
) -> Result<HttpResponse, CoreError> {
    let Some(user) = current_user(&req) else {
        return Ok(unauthorized());
    };
    let meeting = data
        .coordinator
        .update(&meeting_id, &user, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Meeting updated successfully",
        "meeting": MeetingView::from(meeting),
    })))
}

/// DELETE /api/meetings/{id}
pub async fn cancel_meeting(
    req: HttpRequest,
    data: web::Data<AppState>,
    meeting_id: web::Path<String>,
) -> Result<HttpResponse, CoreError> {
    let Some(user) = current_user(&req) else {
        return Ok(unauthorized());
    };
    data.coordinator.cancel(&meeting_id, &user).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Meeting cancelled successfully",
    })))
}

/// POST /api/meetings/{id}/join
pub async fn join_meeting(
    req: HttpRequest,
    data: web::Data<AppState>,
    meeting_id: web::Path<String>,
) -> Result<HttpResponse, CoreError> {
    let Some(user) = current_user(&req) else {
        return Ok(unauthorized());
    };
    let meeting = data.coordinator.join(&meeting_id, &user).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "meetingLink": meeting.meeting_link,
    })))
}

/// POST /api/meetings/{id}/complete
pub async fn complete_meeting(
    req: HttpRequest,
    data: web::Data<AppState>,
    meeting_id: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, CoreError> {
    let Some(user) = current_user(&req) else {
        return Ok(unauthorized());
    };
    // The body is optional, but one that is sent must parse.
    let body: CompleteMeetingRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CompleteMeetingRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| CoreError::InvalidInput(format!("malformed completion body: {e}")))?
    };
    let meeting = data.coordinator.complete(&meeting_id, &user, body).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Meeting marked as completed",
        "meeting": MeetingView::from(meeting),
    })))
}

#[cfg(test)]
mod tests {
    use actix_web::http::{header, StatusCode};
    use actix_web::test::{call_service, init_service, read_body_json, TestRequest};
    use actix_web::{web, App};
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use crate::app_state::tests::{state, SECRET};
    use crate::auth::tests::create_jwt;
    use crate::auth::Authentication;

    fn bearer(user: &str) -> (header::HeaderName, String) {
        (header::AUTHORIZATION, format!("Bearer {}", create_jwt(user, SECRET).unwrap()))
    }

    macro_rules! app {
        () => {
            init_service(
                App::new()
                    .wrap(Authentication::new(SECRET))
                    .app_data(web::Data::new(state()))
                    .configure(crate::routes),
            )
            .await
        };
    }

    fn booking() -> Value {
        json!({
            "mentorId": "mentor",
            "subject": "Borrow checker",
            "scheduledAt": (Utc::now() + Duration::days(1)).to_rfc3339(),
            "duration": 60,
        })
    }

    #[actix_web::test]
    async fn book_join_complete_over_http() {
        let app = app!();

        let req = TestRequest::post()
            .uri("/api/meetings/create")
            .insert_header(bearer("learner"))
            .set_json(booking())
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["meeting"]["status"], "scheduled");
        assert_eq!(body["meeting"]["isUpcoming"], true);
        let id = body["meeting"]["id"].as_str().unwrap().to_string();

        let req = TestRequest::post()
            .uri(&format!("/api/meetings/{id}/join"))
            .insert_header(bearer("learner"))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert!(body["meetingLink"].as_str().unwrap().starts_with("https://meet.google.com/mock-"));

        let req = TestRequest::post()
            .uri(&format!("/api/meetings/{id}/complete"))
            .insert_header(bearer("mentor"))
            .set_json(json!({ "rating": 5, "feedback": "thanks" }))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body["meeting"]["status"], "completed");
        assert_eq!(body["meeting"]["rating"], 5);

        let req = TestRequest::get()
            .uri("/api/meetings?status=completed")
            .insert_header(bearer("mentor"))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body["count"], 1);
    }

    #[actix_web::test]
    async fn malformed_completion_body_is_rejected() {
        let app = app!();
        let req = TestRequest::post()
            .uri("/api/meetings/create")
            .insert_header(bearer("learner"))
            .set_json(booking())
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        let id = body["meeting"]["id"].as_str().unwrap().to_string();

        for bad in [json!({ "rating": 300, "feedback": "x" }), json!({ "rating": "5" })] {
            let req = TestRequest::post()
                .uri(&format!("/api/meetings/{id}/complete"))
                .insert_header(bearer("learner"))
                .set_json(bad)
                .to_request();
            assert_eq!(call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        }

        let req = TestRequest::get()
            .uri(&format!("/api/meetings/{id}"))
            .insert_header(bearer("learner"))
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        assert_eq!(body["meeting"]["status"], "scheduled");

        // No body at all still completes.
        let req = TestRequest::post()
            .uri(&format!("/api/meetings/{id}/complete"))
            .insert_header(bearer("learner"))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["meeting"]["status"], "completed");
        assert_eq!(body["meeting"]["rating"], Value::Null);
    }

    #[actix_web::test]
    async fn errors_map_to_status_codes() {
        let app = app!();

        let req = TestRequest::post().uri("/api/meetings/create").set_json(booking()).to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let mut past = booking();
        past["scheduledAt"] = json!((Utc::now() - Duration::days(1)).to_rfc3339());
        let req = TestRequest::post()
            .uri("/api/meetings/create")
            .insert_header(bearer("learner"))
            .set_json(past)
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Meeting date cannot be in the past");

        let req = TestRequest::post()
            .uri("/api/meetings/create")
            .insert_header(bearer("learner"))
            .set_json(booking())
            .to_request();
        let body: Value = read_body_json(call_service(&app, req).await).await;
        let id = body["meeting"]["id"].as_str().unwrap().to_string();

        let req = TestRequest::get()
            .uri(&format!("/api/meetings/{id}"))
            .insert_header(bearer("stranger"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = TestRequest::get()
            .uri("/api/meetings/missing")
            .insert_header(bearer("learner"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = TestRequest::delete()
            .uri(&format!("/api/meetings/{id}"))
            .insert_header(bearer("mentor"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::OK);

        let req = TestRequest::post()
            .uri(&format!("/api/meetings/{id}/join"))
            .insert_header(bearer("learner"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::CONFLICT);
    }
}
