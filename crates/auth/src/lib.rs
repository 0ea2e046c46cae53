//! `sessionguard-auth` — token-pair authentication and rotation protocol.
//!
//! This crate is intentionally decoupled from HTTP and SQL. Storage backends
//! other than the in-memory one live in `sessionguard-infra`; the transport
//! lives in `sessionguard-api`.

pub mod claims;
pub mod codec;
pub mod credential;
pub mod identity;
pub mod issuer;
pub mod service;
pub mod session_store;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use claims::{AccessClaims, TokenKind, TokenValidationError, validate_claims};
pub use codec::{CodecError, Hs256TokenCodec, TokenCodec, Verification};
pub use credential::{PresentedAccess, generate_refresh_value};
pub use identity::{DirectoryError, Identity, IdentityDirectory};
pub use issuer::{IssueError, TokenIssuer, TokenPair};
pub use service::{AuthError, AuthService, AuthSettings};
pub use session_store::{
    DeadlineSessionStore, DeviceFingerprint, InMemorySessionStore, RotateOutcome, SessionRecord,
    SessionStore, StoreError,
};
pub use verifier::{OrphanedIdentityPolicy, SessionVerifier, Verified, VerifyError};
