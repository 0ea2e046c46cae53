//! The token-pair protocol state machine.
//!
//! Given a session record (already resolved from the presented refresh
//! credential) and whatever access credential came with the request, decide
//! one of:
//!
//! 1. absent / malformed access          -> rotate
//! 2. access fails verification           -> rotate
//! 3. access belongs to another identity  -> reject `PairMismatch`, no mutation
//! 4. access valid, identity deleted      -> [`OrphanedIdentityPolicy`]
//! 5. access valid, identity exists       -> accept unchanged
//!
//! A rotation that loses the store compare-and-swap fails closed with
//! `TokenInvalid`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use sessionguard_events::{EventBus, SessionEvent};

use crate::codec::{CodecError, TokenCodec, Verification};
use crate::credential::PresentedAccess;
use crate::identity::{DirectoryError, IdentityDirectory};
use crate::issuer::{IssueError, TokenIssuer, TokenPair};
use crate::session_store::{SessionRecord, StoreError};

/// What to do when a valid access token names an identity that no longer
/// exists.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OrphanedIdentityPolicy {
    /// Soft-invalidate and reissue, as for an invalid access token.
    #[default]
    Rotate,
    /// Refuse with `TokenInvalid`; the session is left untouched.
    Reject,
}

/// Successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    /// Whether the client must persist new credentials.
    pub changed: bool,
    pub access_token: String,
    pub refresh_token: String,
}

impl Verified {
    fn rotated(pair: TokenPair) -> Self {
        Self {
            changed: true,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Credentials are dead; the client must log in again.
    #[error("token invalid")]
    TokenInvalid,

    /// Access and refresh credentials belong to different identities.
    #[error("access and refresh credentials belong to different identities")]
    PairMismatch,

    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("failed to sign access credential: {0}")]
    Signing(String),
}

impl From<StoreError> for VerifyError {
    fn from(err: StoreError) -> Self {
        VerifyError::StoreUnavailable(err.to_string())
    }
}

impl From<DirectoryError> for VerifyError {
    fn from(err: DirectoryError) -> Self {
        VerifyError::StoreUnavailable(err.to_string())
    }
}

impl From<CodecError> for VerifyError {
    fn from(err: CodecError) -> Self {
        VerifyError::Signing(err.to_string())
    }
}

impl From<IssueError> for VerifyError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::Conflict => VerifyError::TokenInvalid,
            IssueError::Store(e) => e.into(),
            IssueError::Codec(e) => e.into(),
        }
    }
}

/// Stateless decision engine; safe to share across requests.
pub struct SessionVerifier {
    codec: Arc<dyn TokenCodec>,
    issuer: Arc<TokenIssuer>,
    directory: Arc<dyn IdentityDirectory>,
    events: Arc<dyn EventBus<SessionEvent>>,
    orphan_policy: OrphanedIdentityPolicy,
}

impl SessionVerifier {
    pub fn new(
        codec: Arc<dyn TokenCodec>,
        issuer: Arc<TokenIssuer>,
        directory: Arc<dyn IdentityDirectory>,
        events: Arc<dyn EventBus<SessionEvent>>,
        orphan_policy: OrphanedIdentityPolicy,
    ) -> Self {
        Self {
            codec,
            issuer,
            directory,
            events,
            orphan_policy,
        }
    }

    #[instrument(
        skip_all,
        fields(session_id = %record.session_id, identity_id = %record.identity_id),
        err
    )]
    pub async fn decide(
        &self,
        record: &SessionRecord,
        presented: PresentedAccess<'_>,
        now: DateTime<Utc>,
    ) -> Result<Verified, VerifyError> {
        let token = match presented {
            PresentedAccess::Absent | PresentedAccess::Malformed => {
                debug!(presented = ?presented, "no usable access credential, rotating");
                return self.rotate(record, now).await;
            }
            PresentedAccess::Bearer(token) => token,
        };

        let claims = match self.codec.verify(token, now) {
            Verification::Valid(claims) => claims,
            failure => {
                debug!(reason = failure.failure_reason(), "access credential rejected, rotating");
                return self.rotate(record, now).await;
            }
        };

        if claims.sub != record.identity_id {
            warn!(
                presented_identity = %claims.sub,
                "pair mismatch: access credential of another identity presented with this session"
            );
            if let Err(e) = self.events.publish(SessionEvent::PairMismatch {
                session_id: record.session_id,
                session_identity: record.identity_id,
                presented_identity: claims.sub,
                occurred_at: now,
            }) {
                warn!(error = %e, "failed to publish session event");
            }
            return Err(VerifyError::PairMismatch);
        }

        if self.directory.find(record.identity_id).await?.is_none() {
            return match self.orphan_policy {
                OrphanedIdentityPolicy::Rotate => {
                    debug!("identity no longer exists, rotating");
                    self.rotate(record, now).await
                }
                OrphanedIdentityPolicy::Reject => {
                    warn!("identity no longer exists, rejecting");
                    Err(VerifyError::TokenInvalid)
                }
            };
        }

        Ok(Verified {
            changed: false,
            access_token: token.to_string(),
            refresh_token: record.credential_value.clone(),
        })
    }

    async fn rotate(&self, record: &SessionRecord, now: DateTime<Utc>) -> Result<Verified, VerifyError> {
        let pair = self.issuer.rotate_pair(record, now).await?;
        Ok(Verified::rotated(pair))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use sessionguard_core::IdentityId;
    use sessionguard_events::InMemoryEventBus;

    use crate::claims::TokenKind;
    use crate::codec::Hs256TokenCodec;
    use crate::session_store::{DeviceFingerprint, InMemorySessionStore, SessionStore};
    use crate::testing::FakeDirectory;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const REALM: &str = "test-realm";

    struct Harness {
        verifier: SessionVerifier,
        issuer: Arc<TokenIssuer>,
        store: Arc<InMemorySessionStore>,
        directory: Arc<FakeDirectory>,
        bus: Arc<InMemoryEventBus<SessionEvent>>,
    }

    fn harness(policy: OrphanedIdentityPolicy) -> Harness {
        let codec = Arc::new(Hs256TokenCodec::new(SECRET, REALM).unwrap());
        let store = Arc::new(InMemorySessionStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let directory = Arc::new(FakeDirectory::default());
        let issuer = Arc::new(TokenIssuer::new(
            codec.clone(),
            store.clone(),
            bus.clone(),
            Duration::minutes(15),
        ));
        let verifier = SessionVerifier::new(codec, issuer.clone(), directory.clone(), bus.clone(), policy);
        Harness {
            verifier,
            issuer,
            store,
            directory,
            bus,
        }
    }

    impl Harness {
        async fn login(&self, identity: IdentityId, now: DateTime<Utc>) -> TokenPair {
            self.directory.add(identity);
            self.issuer
                .issue_pair(identity, DeviceFingerprint::default(), now)
                .await
                .unwrap()
        }

        async fn record(&self, refresh: &str) -> Option<SessionRecord> {
            self.store.find_by_credential(refresh).await.unwrap()
        }

        async fn verify(
            &self,
            access: Option<&str>,
            refresh: &str,
            now: DateTime<Utc>,
        ) -> Result<Verified, VerifyError> {
            let record = self.record(refresh).await.ok_or(VerifyError::TokenInvalid)?;
            let presented = match access {
                Some(token) => PresentedAccess::Bearer(token),
                None => PresentedAccess::Absent,
            };
            self.verifier.decide(&record, presented, now).await
        }
    }

    #[tokio::test]
    async fn immediate_reverification_is_a_no_op() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let pair = h.login(IdentityId::new(), now).await;

        let out = h
            .verify(Some(&pair.access_token), &pair.refresh_token, now)
            .await
            .unwrap();

        assert_eq!(
            out,
            Verified {
                changed: false,
                access_token: pair.access_token.clone(),
                refresh_token: pair.refresh_token.clone(),
            }
        );
        assert!(h.record(&pair.refresh_token).await.is_some());
    }

    #[tokio::test]
    async fn missing_access_always_rotates() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let pair = h.login(IdentityId::new(), now).await;

        let out = h.verify(None, &pair.refresh_token, now).await.unwrap();

        assert!(out.changed);
        assert_ne!(out.refresh_token, pair.refresh_token);
        assert!(h.record(&out.refresh_token).await.is_some());
    }

    #[tokio::test]
    async fn malformed_access_rotates() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let pair = h.login(IdentityId::new(), now).await;
        let record = h.record(&pair.refresh_token).await.unwrap();

        let out = h
            .verifier
            .decide(&record, PresentedAccess::Malformed, now)
            .await
            .unwrap();
        assert!(out.changed);

        let record = h.record(&out.refresh_token).await.unwrap();
        let out = h
            .verifier
            .decide(&record, PresentedAccess::Bearer("garbage"), now)
            .await
            .unwrap();
        assert!(out.changed);
    }

    #[tokio::test]
    async fn rotated_away_refresh_value_is_dead() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let pair = h.login(IdentityId::new(), now).await;
        let rotated = h.verify(None, &pair.refresh_token, now).await.unwrap();

        let err = h
            .verify(Some(&rotated.access_token), &pair.refresh_token, now)
            .await
            .unwrap_err();

        assert_eq!(err, VerifyError::TokenInvalid);
    }

    #[tokio::test]
    async fn cross_session_combination_is_rejected_without_mutation() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let events = h.bus.subscribe();
        let now = Utc::now();
        let first = h.login(IdentityId::new(), now).await;
        let second = h.login(IdentityId::new(), now).await;

        let err = h
            .verify(Some(&first.access_token), &second.refresh_token, now)
            .await
            .unwrap_err();
        assert_eq!(err, VerifyError::PairMismatch);

        let out = h
            .verify(Some(&second.access_token), &second.refresh_token, now)
            .await
            .unwrap();
        assert!(!out.changed);
        assert_eq!(out.refresh_token, second.refresh_token);

        let mismatches = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, SessionEvent::PairMismatch { .. }))
            .count();
        assert_eq!(mismatches, 1);
    }

    #[tokio::test]
    async fn pair_mismatch_wins_over_orphaned_identity() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let attacker = IdentityId::new();
        let victim = IdentityId::new();
        let attacker_pair = h.login(attacker, now).await;
        let victim_pair = h.login(victim, now).await;
        h.directory.remove(victim);

        let err = h
            .verify(Some(&attacker_pair.access_token), &victim_pair.refresh_token, now)
            .await
            .unwrap_err();

        assert_eq!(err, VerifyError::PairMismatch);
        assert!(h.record(&victim_pair.refresh_token).await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotation_has_exactly_one_winner() {
        let h = Arc::new(harness(OrphanedIdentityPolicy::Rotate));
        let now = Utc::now();
        let pair = h.login(IdentityId::new(), now).await;
        let record = h.record(&pair.refresh_token).await.unwrap();

        let (a, b) = tokio::join!(
            {
                let h = h.clone();
                let record = record.clone();
                tokio::spawn(async move { h.verifier.decide(&record, PresentedAccess::Absent, now).await })
            },
            {
                let h = h.clone();
                let record = record.clone();
                tokio::spawn(async move { h.verifier.decide(&record, PresentedAccess::Absent, now).await })
            }
        );
        let results = [a.unwrap(), b.unwrap()];

        let winners: Vec<&Verified> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let losers: Vec<&VerifyError> = results.iter().filter_map(|r| r.as_ref().err()).collect();

        assert_eq!(winners.len(), 1);
        assert!(winners[0].changed);
        assert_ne!(winners[0].refresh_token, pair.refresh_token);
        assert_eq!(losers, vec![&VerifyError::TokenInvalid]);
    }

    #[tokio::test]
    async fn wrong_audience_access_drives_rotation() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let identity = IdentityId::new();
        let pair = h.login(identity, now).await;

        let foreign = Hs256TokenCodec::new(SECRET, "another-deployment")
            .unwrap()
            .sign(identity, TokenKind::Access, Duration::minutes(15), now)
            .unwrap();

        let out = h.verify(Some(&foreign), &pair.refresh_token, now).await.unwrap();

        assert!(out.changed);
        assert_ne!(out.access_token, foreign);
        assert_ne!(out.refresh_token, pair.refresh_token);
    }

    #[tokio::test]
    async fn expired_access_drives_rotation() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let issued = Utc::now();
        let pair = h.login(IdentityId::new(), issued).await;

        let later = issued + Duration::minutes(16);
        let out = h
            .verify(Some(&pair.access_token), &pair.refresh_token, later)
            .await
            .unwrap();

        assert!(out.changed);
        assert!(h.verifier.codec.verify(&out.access_token, later).is_valid());
    }

    #[tokio::test]
    async fn bad_signature_access_drives_rotation() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let identity = IdentityId::new();
        let pair = h.login(identity, now).await;

        let forged = Hs256TokenCodec::new(b"ffffffffffffffffffffffffffffffff", REALM)
            .unwrap()
            .sign(identity, TokenKind::Access, Duration::minutes(15), now)
            .unwrap();

        let out = h.verify(Some(&forged), &pair.refresh_token, now).await.unwrap();

        assert!(out.changed);
        assert_ne!(out.access_token, forged);
        assert!(h.record(&pair.refresh_token).await.is_none());
        assert_eq!(h.record(&out.refresh_token).await.unwrap().identity_id, identity);
    }

    #[tokio::test]
    async fn refresh_kind_token_drives_rotation() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let identity = IdentityId::new();
        let pair = h.login(identity, now).await;

        let wrong_kind = h
            .verifier
            .codec
            .sign(identity, TokenKind::Refresh, Duration::minutes(15), now)
            .unwrap();

        let out = h.verify(Some(&wrong_kind), &pair.refresh_token, now).await.unwrap();

        assert!(out.changed);
        assert!(h.verifier.codec.verify(&out.access_token, now).is_valid());
        assert!(h.record(&pair.refresh_token).await.is_none());
        assert!(h.record(&out.refresh_token).await.is_some());
    }

    #[tokio::test]
    async fn orphaned_identity_rotates_under_default_policy() {
        let h = harness(OrphanedIdentityPolicy::Rotate);
        let now = Utc::now();
        let identity = IdentityId::new();
        let pair = h.login(identity, now).await;
        h.directory.remove(identity);

        let out = h
            .verify(Some(&pair.access_token), &pair.refresh_token, now)
            .await
            .unwrap();

        assert!(out.changed);
    }

    #[tokio::test]
    async fn orphaned_identity_is_rejected_under_strict_policy() {
        let h = harness(OrphanedIdentityPolicy::Reject);
        let now = Utc::now();
        let identity = IdentityId::new();
        let pair = h.login(identity, now).await;
        h.directory.remove(identity);

        let err = h
            .verify(Some(&pair.access_token), &pair.refresh_token, now)
            .await
            .unwrap_err();

        assert_eq!(err, VerifyError::TokenInvalid);
        assert!(h.record(&pair.refresh_token).await.is_some());
    }
}
