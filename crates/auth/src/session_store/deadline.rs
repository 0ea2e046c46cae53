//! Time-bounded adapter around any [`SessionStore`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use sessionguard_core::{IdentityId, SessionId};

use super::{DeviceFingerprint, RotateOutcome, SessionRecord, SessionStore, StoreError};

/// Adapter that bounds every store call by `timeout`.
///
/// An expired call surfaces as [`StoreError::Timeout`]. The inner future is
/// dropped, so a backend must not commit half of an operation when cancelled
/// (SQL backends get this from running each call as one statement).
#[derive(Debug, Clone)]
pub struct DeadlineSessionStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> DeadlineSessionStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "session store call timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl<S> SessionStore for DeadlineSessionStore<S>
where
    S: SessionStore,
{
    async fn create(
        &self,
        identity_id: IdentityId,
        device: DeviceFingerprint,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StoreError> {
        self.bounded("create", self.inner.create(identity_id, device, now)).await
    }

    async fn find_by_credential(&self, value: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.bounded("find_by_credential", self.inner.find_by_credential(value)).await
    }

    async fn rotate(
        &self,
        session_id: SessionId,
        expected_old_value: &str,
        new_value: &str,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        self.bounded(
            "rotate",
            self.inner.rotate(session_id, expected_old_value, new_value, now),
        )
        .await
    }

    async fn delete_by_session_id(&self, session_id: SessionId) -> Result<bool, StoreError> {
        self.bounded("delete_by_session_id", self.inner.delete_by_session_id(session_id))
            .await
    }

    async fn delete_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
        self.bounded("delete_by_identity", self.inner.delete_by_identity(identity_id))
            .await
    }

    async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
        self.bounded("list_by_identity", self.inner.list_by_identity(identity_id))
            .await
    }

    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.bounded("purge_idle", self.inner.purge_idle(before)).await
    }
}
