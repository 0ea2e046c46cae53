use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};

use sessionguard_auth::{SessionRecord, TokenPair, Verified};

use crate::app::errors;

/// Upper bound on any credential or login field we are willing to look at.
pub const MAX_FIELD_LEN: usize = 4096;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

type FieldErrors = BTreeMap<&'static str, String>;

fn check_present(fields: &mut FieldErrors, name: &'static str, value: &str) {
    if value.trim().is_empty() {
        fields.insert(name, "must not be empty".to_string());
    } else if value.len() > MAX_FIELD_LEN {
        fields.insert(name, format!("must be at most {MAX_FIELD_LEN} bytes"));
    }
}

fn finish(fields: FieldErrors) -> Result<(), axum::response::Response> {
    if fields.is_empty() {
        Ok(())
    } else {
        Err(errors::validation_error(fields))
    }
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), axum::response::Response> {
        let mut fields = FieldErrors::new();
        check_present(&mut fields, "login", &self.login);
        check_present(&mut fields, "password", &self.password);
        finish(fields)
    }
}

impl RefreshRequest {
    pub fn validate(&self) -> Result<(), axum::response::Response> {
        let mut fields = FieldErrors::new();
        check_present(&mut fields, "refresh_token", &self.refresh_token);
        finish(fields)
    }
}

/// Turn a body that failed to parse into a 422 instead of axum's plain-text rejection.
pub fn body_rejection(rejection: JsonRejection) -> axum::response::Response {
    let mut fields = FieldErrors::new();
    fields.insert("body", rejection.body_text());
    errors::validation_error(fields)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenCode {
    TokenIssued,
    TokenUnchanged,
    TokenRotated,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub code: TokenCode,
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            code: TokenCode::TokenIssued,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }
    }
}

impl From<Verified> for TokenResponse {
    fn from(v: Verified) -> Self {
        Self {
            code: if v.changed {
                TokenCode::TokenRotated
            } else {
                TokenCode::TokenUnchanged
            },
            access_token: v.access_token,
            refresh_token: v.refresh_token,
        }
    }
}

/// A session as shown to its owner. Never carries the credential value.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
    pub last_rotated_at: String,
}

pub fn session_to_view(record: SessionRecord) -> SessionView {
    SessionView {
        session_id: record.session_id.to_string(),
        ip: record.device.ip,
        user_agent: record.device.user_agent,
        created_at: record.created_at.to_rfc3339(),
        last_rotated_at: record.updated_at.to_rfc3339(),
    }
}
