//! Access credential signing and verification.
//!
//! The codec is stateless: a pure function over its key, the configured
//! audience, the claims and the caller-supplied `now`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use thiserror::Error;

use sessionguard_core::IdentityId;

use crate::claims::{AccessClaims, TokenKind, TokenValidationError, validate_claims};

/// Shortest HMAC secret accepted by [`Hs256TokenCodec`].
pub const MIN_SECRET_LEN: usize = 32;

/// Outcome of verifying a presented access credential.
///
/// `Valid` is only produced when every check passed; each failure is its own
/// variant so callers branch exhaustively instead of catching errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(AccessClaims),
    Malformed,
    BadSignature,
    Expired,
    WrongAudience,
    WrongKind,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    /// Stable failure label for logs; `None` when valid.
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            Verification::Valid(_) => None,
            Verification::Malformed => Some("malformed"),
            Verification::BadSignature => Some("bad_signature"),
            Verification::Expired => Some("expired"),
            Verification::WrongAudience => Some("wrong_audience"),
            Verification::WrongKind => Some("wrong_kind"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("signing secret too short ({0} bytes, need at least {MIN_SECRET_LEN})")]
    WeakKey(usize),

    #[error("failed to encode token: {0}")]
    Encoding(String),

    #[error("token lifetime {0} overflows the representable time range")]
    LifetimeOutOfRange(Duration),
}

/// Signs and verifies compact access credentials.
pub trait TokenCodec: Send + Sync {
    /// Produce a signed token for `identity_id` valid from `now` for `ttl`.
    fn sign(
        &self,
        identity_id: IdentityId,
        kind: TokenKind,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, CodecError>;

    /// Check signature, audience, kind and expiry of `token` at `now`.
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Verification;

    /// The realm this codec mints and accepts tokens for.
    fn audience(&self) -> &str;
}

/// HMAC-SHA256 JWT codec bound to a single audience.
#[derive(Clone)]
pub struct Hs256TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    audience: String,
    validation: Validation,
}

impl core::fmt::Debug for Hs256TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256TokenCodec")
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl Hs256TokenCodec {
    pub fn new(secret: &[u8], audience: impl Into<String>) -> Result<Self, CodecError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CodecError::WeakKey(secret.len()));
        }
        let audience = audience.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        // Time checks, skew allowance included, run in `validate_claims`
        // against the caller's `now`.
        validation.validate_exp = false;
        validation.leeway = 0;

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            audience,
            validation,
        })
    }
}

impl TokenCodec for Hs256TokenCodec {
    fn sign(
        &self,
        identity_id: IdentityId,
        kind: TokenKind,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, CodecError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(CodecError::LifetimeOutOfRange(ttl))?;
        let claims = AccessClaims::new(identity_id, kind, self.audience.clone(), now, expires_at);

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CodecError::Encoding(e.to_string()))
    }

    fn verify(&self, token: &str, now: DateTime<Utc>) -> Verification {
        let claims = match jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &self.validation) {
            Ok(data) => data.claims,
            Err(err) => {
                return match err.kind() {
                    ErrorKind::InvalidSignature => Verification::BadSignature,
                    ErrorKind::InvalidAudience => Verification::WrongAudience,
                    _ => Verification::Malformed,
                };
            }
        };

        match validate_claims(&claims, now) {
            Ok(()) => Verification::Valid(claims),
            Err(TokenValidationError::Expired) => Verification::Expired,
            Err(TokenValidationError::WrongKind) => Verification::WrongKind,
            Err(TokenValidationError::NotYetValid | TokenValidationError::InvalidTimeWindow) => {
                Verification::Malformed
            }
        }
    }

    fn audience(&self) -> &str {
        &self.audience
    }
}
