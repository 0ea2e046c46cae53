use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

/// The caller's live sessions, oldest first.
pub async fn list_sessions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    match services.auth.sessions_of(principal.identity_id(), Utc::now()).await {
        Ok(sessions) => {
            let items = sessions.into_iter().map(dto::session_to_view).collect::<Vec<_>>();
            (StatusCode::OK, Json(json!({ "items": items }))).into_response()
        }
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// Log the caller out everywhere.
pub async fn revoke_all(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    match services.auth.revoke_identity(principal.identity_id(), Utc::now()).await {
        Ok(revoked) => (StatusCode::OK, Json(json!({ "revoked": revoked }))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}
