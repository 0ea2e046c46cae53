//! Token pair issuance and rotation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use sessionguard_core::{IdentityId, SessionId};
use sessionguard_events::{EventBus, SessionEvent};

use crate::claims::TokenKind;
use crate::codec::{CodecError, TokenCodec};
use crate::credential::generate_refresh_value;
use crate::session_store::{
    DeviceFingerprint, MAX_CREATE_ATTEMPTS, RotateOutcome, SessionRecord, SessionStore, StoreError,
};

/// An access credential together with the refresh credential of its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub session_id: SessionId,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssueError {
    /// The stored refresh value changed underneath the rotation. The caller's
    /// copy of the old pair must be considered dead.
    #[error("rotation lost to a concurrent update")]
    Conflict,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Builds fresh (access, refresh) pairs and persists the refresh side.
///
/// The access token is signed *before* the store is touched, so a signing
/// failure never leaves a mutated session behind.
pub struct TokenIssuer {
    codec: Arc<dyn TokenCodec>,
    store: Arc<dyn SessionStore>,
    events: Arc<dyn EventBus<SessionEvent>>,
    access_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        codec: Arc<dyn TokenCodec>,
        store: Arc<dyn SessionStore>,
        events: Arc<dyn EventBus<SessionEvent>>,
        access_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            store,
            events,
            access_ttl,
        }
    }

    pub fn codec(&self) -> &Arc<dyn TokenCodec> {
        &self.codec
    }

    /// Open a new session for `identity_id` (login).
    #[instrument(skip_all, fields(identity_id = %identity_id), err)]
    pub async fn issue_pair(
        &self,
        identity_id: IdentityId,
        device: DeviceFingerprint,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, IssueError> {
        let access_token = self.sign_access(identity_id, now)?;
        let record = self.store.create(identity_id, device, now).await?;

        info!(session_id = %record.session_id, "session opened");
        self.publish(SessionEvent::Opened {
            session_id: record.session_id,
            identity_id,
            occurred_at: now,
        });

        Ok(TokenPair {
            session_id: record.session_id,
            access_token,
            refresh_token: record.credential_value,
        })
    }

    /// Replace the refresh value of `record` and mint a matching access token.
    ///
    /// Never retries a `Conflict`: losing the compare-and-swap means someone
    /// else already used this refresh value.
    #[instrument(
        skip_all,
        fields(session_id = %record.session_id, identity_id = %record.identity_id),
        err
    )]
    pub async fn rotate_pair(&self, record: &SessionRecord, now: DateTime<Utc>) -> Result<TokenPair, IssueError> {
        let access_token = self.sign_access(record.identity_id, now)?;

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let new_value = generate_refresh_value();
            let outcome = self
                .store
                .rotate(record.session_id, &record.credential_value, &new_value, now)
                .await;

            match outcome {
                Ok(RotateOutcome::Rotated(updated)) => {
                    info!("session rotated");
                    self.publish(SessionEvent::Rotated {
                        session_id: updated.session_id,
                        identity_id: updated.identity_id,
                        occurred_at: now,
                    });
                    return Ok(TokenPair {
                        session_id: updated.session_id,
                        access_token,
                        refresh_token: updated.credential_value,
                    });
                }
                Ok(RotateOutcome::Conflict) => {
                    warn!("rotation lost compare-and-swap; refresh value already consumed");
                    self.publish(SessionEvent::RotationRaceLost {
                        session_id: record.session_id,
                        identity_id: record.identity_id,
                        occurred_at: now,
                    });
                    return Err(IssueError::Conflict);
                }
                // A value collision is not a race: the CAS did not run.
                Err(StoreError::DuplicateCredential) => {
                    debug!(attempt, "generated refresh value collided, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::DuplicateCredential.into())
    }

    fn sign_access(&self, identity_id: IdentityId, now: DateTime<Utc>) -> Result<String, CodecError> {
        self.codec.sign(identity_id, TokenKind::Access, self.access_ttl, now)
    }

    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.events.publish(event) {
            warn!(error = %e, "failed to publish session event");
        }
    }
}
