use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http, Error, HttpMessage, HttpRequest, HttpResponse,
};
use futures::future::{ok, Ready};
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// The user id the [`Authentication`] middleware attached to the request.
pub fn current_user(req: &HttpRequest) -> Option<String> {
    req.extensions().get::<String>().cloned()
}

pub fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({ "success": false, "message": "Unauthorized" }))
}

/// Bearer-token middleware. A valid token puts the caller's user id into the
/// request extensions; an invalid one is answered with 401. Requests without
/// a token pass through and handlers decide.
#[derive(Debug, Clone)]
pub struct Authentication {
    secret: Rc<String>,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Authentication { secret: Rc::new(secret.into()) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        if let Some(token) = token {
            match validate_jwt(&token, &self.secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(claims.sub);
                }
                Err(e) => {
                    debug!("Rejected bearer token: {}", e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .json(json!({ "success": false, "message": format!("Invalid token: {e}") }))
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use actix_web::test::{call_service, init_service, read_body, TestRequest};
    use actix_web::{web, App};
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    /// Tokens are issued by the account service; tests mint their own.
    pub(crate) fn create_jwt(
        user_id: &str,
        secret: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + Duration::hours(24)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
    }

    async fn whoami(req: HttpRequest) -> HttpResponse {
        match current_user(&req) {
            Some(user) => HttpResponse::Ok().body(user),
            None => unauthorized(),
        }
    }

    #[test]
    fn token_round_trip() {
        let token = create_jwt("user-1", SECRET).unwrap();
        assert_eq!(validate_jwt(&token, SECRET).unwrap().sub, "user-1");
        assert!(validate_jwt(&token, "other-secret").is_err());
    }

    #[actix_web::test]
    async fn valid_token_attaches_the_user() {
        let app = init_service(
            App::new()
                .wrap(Authentication::new(SECRET))
                .route("/me", web::get().to(whoami)),
        )
        .await;
        let token = create_jwt("user-1", SECRET).unwrap();
        let req = TestRequest::get()
            .uri("/me")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {token}")))
            .to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(read_body(resp).await, "user-1");
    }

    #[actix_web::test]
    async fn bad_or_missing_tokens_are_unauthorized() {
        let app = init_service(
            App::new()
                .wrap(Authentication::new(SECRET))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/me")
            .insert_header((http::header::AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), http::StatusCode::UNAUTHORIZED);

        let req = TestRequest::get().uri("/me").to_request();
        assert_eq!(call_service(&app, req).await.status(), http::StatusCode::UNAUTHORIZED);
    }
}
