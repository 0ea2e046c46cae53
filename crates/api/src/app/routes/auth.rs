use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;

use sessionguard_auth::DeviceFingerprint;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::middleware::presented_access;

const MAX_USER_AGENT_LEN: usize = 512;

pub fn router() -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/verify", post(verify))
        .route("/logout", post(logout))
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<dto::LoginRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return dto::body_rejection(rejection),
    };
    if let Err(resp) = body.validate() {
        return resp;
    }

    match services
        .auth
        .login(&body.login, &body.password, device_from_headers(&headers), Utc::now())
        .await
    {
        Ok(pair) => (StatusCode::OK, Json(dto::TokenResponse::from(pair))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// Check a credential pair; rotates it when the access token is missing or unusable.
pub async fn verify(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<dto::RefreshRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return dto::body_rejection(rejection),
    };
    if let Err(resp) = body.validate() {
        return resp;
    }

    match services
        .auth
        .refresh(presented_access(&headers), &body.refresh_token, Utc::now())
        .await
    {
        Ok(verified) => (StatusCode::OK, Json(dto::TokenResponse::from(verified))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::RefreshRequest>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return dto::body_rejection(rejection),
    };
    if let Err(resp) = body.validate() {
        return resp;
    }

    match services.auth.logout(&body.refresh_token, Utc::now()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// Informational device data; proxies are trusted to set `X-Forwarded-For`.
fn device_from_headers(headers: &HeaderMap) -> DeviceFingerprint {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    DeviceFingerprint {
        ip: header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string()),
        user_agent: header("user-agent").map(|v| v.chars().take(MAX_USER_AGENT_LEN).collect()),
    }
}
