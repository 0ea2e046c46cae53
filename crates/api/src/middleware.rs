use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use sessionguard_auth::{AuthService, PresentedAccess};

use crate::app::errors;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub auth: Arc<AuthService>,
}

/// Require a valid bearer access token; attach the caller as `PrincipalContext`.
///
/// Purely stateless: refresh credentials and the session store are not consulted.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let now = Utc::now();
    let token = presented_access(req.headers())
        .bearer()
        .ok_or_else(unauthorized)?;

    let claims = state
        .auth
        .authenticate_access(token, now)
        .map_err(errors::auth_error_to_response)?;

    req.extensions_mut().insert(PrincipalContext::new(
        claims.sub,
        claims.expires_at().unwrap_or(now),
    ));

    Ok(next.run(req).await)
}

/// Classify the `Authorization` header. A header that is not valid UTF-8 is
/// malformed, not absent.
pub fn presented_access(headers: &HeaderMap) -> PresentedAccess<'_> {
    match headers.get(axum::http::header::AUTHORIZATION) {
        None => PresentedAccess::Absent,
        Some(value) => match value.to_str() {
            Ok(value) => PresentedAccess::from_authorization(Some(value)),
            Err(_) => PresentedAccess::Malformed,
        },
    }
}

fn unauthorized() -> Response {
    errors::json_error(
        StatusCode::UNAUTHORIZED,
        errors::TOKEN_INVALID,
        "missing or malformed bearer token",
    )
}
