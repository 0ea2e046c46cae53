use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use sessionguard_core::IdentityId;

/// Which credential a signed token claims to be.
///
/// Only `Access` tokens are ever accepted by verification; refresh
/// credentials are opaque store-backed strings and are never signed in
/// normal operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Access credential claims (wire format of the signed token body).
///
/// Timestamps are unix seconds, as registered JWT claims require.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject / identity identifier.
    pub sub: IdentityId,

    /// Credential kind marker.
    pub typ: TokenKind,

    /// Audience / realm the token was minted for.
    pub aud: String,

    /// Issued-at (unix seconds).
    pub iat: i64,

    /// Expiration (unix seconds).
    pub exp: i64,

    /// Unique token id; two tokens minted in the same second still differ.
    pub jti: Uuid,
}

impl AccessClaims {
    pub fn new(
        sub: IdentityId,
        typ: TokenKind,
        aud: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub,
            typ,
            aud: aud.into(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        }
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token is not an access credential")]
    WrongKind,
}

/// How far ahead of `now` an `iat` may be before the token counts as
/// not-yet-valid. Covers clock drift between nodes sharing a key.
pub const ISSUED_AT_LEEWAY_SECS: i64 = 5;

/// Deterministically validate access-token claims against `now`.
///
/// Note: this validates the *claims* only. Signature and audience are checked
/// by the codec before this runs. Expiry is exact; only `iat` gets leeway.
pub fn validate_claims(claims: &AccessClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.typ != TokenKind::Access {
        return Err(TokenValidationError::WrongKind);
    }
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now.saturating_add(ISSUED_AT_LEEWAY_SECS) < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
