use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use sessionguard_auth::AuthError;

pub const PAIR_MISMATCH: &str = "PAIR_MISMATCH";
pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
pub const INPUT_VALIDATION: &str = "INPUT_VALIDATION";
pub const STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";
pub const INTERNAL: &str = "INTERNAL";

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    match err {
        AuthError::PairMismatch => json_error(
            StatusCode::UNAUTHORIZED,
            PAIR_MISMATCH,
            "access and refresh credentials do not belong together",
        ),
        AuthError::TokenInvalid => json_error(
            StatusCode::UNAUTHORIZED,
            TOKEN_INVALID,
            "credentials are no longer valid; log in again",
        ),
        AuthError::InvalidCredentials => json_error(
            StatusCode::UNAUTHORIZED,
            INVALID_CREDENTIALS,
            "invalid login or password",
        ),
        AuthError::StoreUnavailable(msg) => {
            error!(error = %msg, "session backend unavailable");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                STORE_UNAVAILABLE,
                "session store unavailable; retry later",
            )
        }
        AuthError::Internal(msg) => {
            error!(error = %msg, "internal error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL, "internal error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 422 with a per-field reason map.
pub fn validation_error(fields: BTreeMap<&'static str, String>) -> axum::response::Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        axum::Json(json!({
            "error": INPUT_VALIDATION,
            "message": "request failed validation",
            "fields": fields,
        })),
    )
        .into_response()
}
