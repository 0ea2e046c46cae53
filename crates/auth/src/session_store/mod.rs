//! Durable session records and the compare-and-swap store boundary.
//!
//! A session record maps a stable `SessionId` to the *current* refresh
//! credential value. The value is the only thing that ever changes, and it
//! changes exclusively through [`SessionStore::rotate`], an atomic
//! conditional update. A value that has been rotated away never resolves
//! again.

pub mod deadline;
pub mod in_memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sessionguard_core::{IdentityId, SessionId};

pub use deadline::DeadlineSessionStore;
pub use in_memory::InMemorySessionStore;

/// How many freshly generated values `create` tries before giving up.
pub const MAX_CREATE_ATTEMPTS: usize = 4;

/// Where a session was opened from. Informational only; never used for
/// authentication decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// One login session on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Current refresh credential value. Secret; never log it.
    pub credential_value: String,
    pub identity_id: IdentityId,
    pub device: DeviceFingerprint,
    pub created_at: DateTime<Utc>,
    /// Advances on every rotation.
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// True when the session has not been rotated since before `cutoff`.
    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.updated_at < cutoff
    }
}

/// Result of a conditional rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The stored value matched and was replaced; carries the updated record.
    Rotated(SessionRecord),
    /// The stored value no longer matched (or the session is gone). Nothing changed.
    Conflict,
}

/// Session store operation error.
///
/// These are **infrastructure** failures. A lost rotation race is not an
/// error here; it is [`RotateOutcome::Conflict`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("session store call exceeded {0:?}")]
    Timeout(std::time::Duration),

    #[error("credential value already in use")]
    DuplicateCredential,
}

/// Durable mapping from session id to current credential value.
///
/// Implementations must:
/// - keep `credential_value` unique across all records
/// - implement `rotate` as a single atomic compare-and-swap on the value
/// - never leave a partial mutation behind on error
/// - delete exactly one record in `delete_by_session_id`
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a session with a newly generated credential value.
    async fn create(
        &self,
        identity_id: IdentityId,
        device: DeviceFingerprint,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StoreError>;

    /// Resolve a refresh credential value to its session.
    async fn find_by_credential(&self, value: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Replace the credential value iff it still equals `expected_old_value`.
    async fn rotate(
        &self,
        session_id: SessionId,
        expected_old_value: &str,
        new_value: &str,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError>;

    /// Delete one session. Returns whether a record was removed.
    async fn delete_by_session_id(&self, session_id: SessionId) -> Result<bool, StoreError>;

    /// Delete every session of an identity in one step. Returns the removed
    /// records, oldest first.
    async fn delete_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError>;

    /// All sessions of an identity, oldest first.
    async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError>;

    /// Delete sessions not rotated since `before`. Returns how many were removed.
    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    async fn create(
        &self,
        identity_id: IdentityId,
        device: DeviceFingerprint,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StoreError> {
        (**self).create(identity_id, device, now).await
    }

    async fn find_by_credential(&self, value: &str) -> Result<Option<SessionRecord>, StoreError> {
        (**self).find_by_credential(value).await
    }

    async fn rotate(
        &self,
        session_id: SessionId,
        expected_old_value: &str,
        new_value: &str,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        (**self).rotate(session_id, expected_old_value, new_value, now).await
    }

    async fn delete_by_session_id(&self, session_id: SessionId) -> Result<bool, StoreError> {
        (**self).delete_by_session_id(session_id).await
    }

    async fn delete_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
        (**self).delete_by_identity(identity_id).await
    }

    async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
        (**self).list_by_identity(identity_id).await
    }

    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_idle(before).await
    }
}
