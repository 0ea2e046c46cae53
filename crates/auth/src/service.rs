//! Application-facing entry points: login, refresh, logout and session
//! administration.
//!
//! `AuthService` resolves the presented refresh credential, enforces the
//! refresh lifetime and hands the record to [`SessionVerifier`]. Transports
//! map [`AuthError`] onto their own status codes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use sessionguard_core::IdentityId;
use sessionguard_events::{CloseReason, EventBus, SessionEvent};

use crate::claims::AccessClaims;
use crate::codec::{TokenCodec, Verification};
use crate::credential::PresentedAccess;
use crate::identity::{DirectoryError, IdentityDirectory};
use crate::issuer::{IssueError, TokenIssuer, TokenPair};
use crate::session_store::{DeviceFingerprint, SessionRecord, SessionStore, StoreError};
use crate::verifier::{OrphanedIdentityPolicy, SessionVerifier, Verified, VerifyError};

/// Lifetimes and policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSettings {
    pub access_ttl: Duration,
    /// A session not rotated for this long is dead.
    pub refresh_ttl: Duration,
    pub orphan_policy: OrphanedIdentityPolicy,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            orphan_policy: OrphanedIdentityPolicy::default(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid login or password")]
    InvalidCredentials,

    #[error("token invalid")]
    TokenInvalid,

    #[error("access and refresh credentials belong to different identities")]
    PairMismatch,

    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<VerifyError> for AuthError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::TokenInvalid => AuthError::TokenInvalid,
            VerifyError::PairMismatch => AuthError::PairMismatch,
            VerifyError::StoreUnavailable(msg) => AuthError::StoreUnavailable(msg),
            VerifyError::Signing(msg) => AuthError::Internal(msg),
        }
    }
}

impl From<IssueError> for AuthError {
    fn from(err: IssueError) -> Self {
        VerifyError::from(err).into()
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::StoreUnavailable(err.to_string())
    }
}

impl From<DirectoryError> for AuthError {
    fn from(err: DirectoryError) -> Self {
        AuthError::StoreUnavailable(err.to_string())
    }
}

pub struct AuthService {
    codec: Arc<dyn TokenCodec>,
    store: Arc<dyn SessionStore>,
    directory: Arc<dyn IdentityDirectory>,
    events: Arc<dyn EventBus<SessionEvent>>,
    issuer: Arc<TokenIssuer>,
    verifier: SessionVerifier,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        codec: Arc<dyn TokenCodec>,
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn IdentityDirectory>,
        events: Arc<dyn EventBus<SessionEvent>>,
        settings: AuthSettings,
    ) -> Self {
        let issuer = Arc::new(TokenIssuer::new(
            codec.clone(),
            store.clone(),
            events.clone(),
            settings.access_ttl,
        ));
        let verifier = SessionVerifier::new(
            codec.clone(),
            issuer.clone(),
            directory.clone(),
            events.clone(),
            settings.orphan_policy,
        );
        Self {
            codec,
            store,
            directory,
            events,
            issuer,
            verifier,
            settings,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Check a password and open a new session.
    #[instrument(skip_all, fields(login = %login), err)]
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        device: DeviceFingerprint,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, AuthError> {
        let Some(identity) = self.directory.authenticate(login, password).await? else {
            warn!("login rejected");
            return Err(AuthError::InvalidCredentials);
        };
        Ok(self.issuer.issue_pair(identity.id, device, now).await?)
    }

    /// Verify a credential pair, rotating it when the access side is unusable.
    pub async fn refresh(
        &self,
        presented: PresentedAccess<'_>,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Verified, AuthError> {
        let record = self.live_session(refresh_token, now).await?;
        Ok(self.verifier.decide(&record, presented, now).await?)
    }

    /// End the session holding `refresh_token`. Unknown values are not an
    /// error; logging out twice is fine.
    #[instrument(skip_all, err)]
    pub async fn logout(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let Some(record) = self.store.find_by_credential(refresh_token).await? else {
            debug!("logout for unknown refresh credential");
            return Ok(());
        };

        if self.store.delete_by_session_id(record.session_id).await? {
            info!(session_id = %record.session_id, identity_id = %record.identity_id, "session closed");
            self.publish(SessionEvent::Closed {
                session_id: record.session_id,
                identity_id: record.identity_id,
                reason: CloseReason::Logout,
                occurred_at: now,
            });
        }
        Ok(())
    }

    /// Close every session of `identity_id`. Returns how many were removed.
    #[instrument(skip_all, fields(identity_id = %identity_id), err)]
    pub async fn revoke_identity(&self, identity_id: IdentityId, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let removed = self.store.delete_by_identity(identity_id).await?;
        info!(removed = removed.len(), "sessions revoked");

        for record in &removed {
            self.publish(SessionEvent::Closed {
                session_id: record.session_id,
                identity_id,
                reason: CloseReason::Revoked,
                occurred_at: now,
            });
        }
        Ok(removed.len() as u64)
    }

    /// Live sessions of `identity_id`, oldest first.
    pub async fn sessions_of(
        &self,
        identity_id: IdentityId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, AuthError> {
        let mut sessions = self.store.list_by_identity(identity_id).await?;
        if let Some(cutoff) = self.idle_cutoff(now) {
            sessions.retain(|s| !s.is_idle_since(cutoff));
        }
        Ok(sessions)
    }

    /// Stateless check of a bearer access token, for protecting resources.
    pub fn authenticate_access(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, AuthError> {
        match self.codec.verify(token, now) {
            Verification::Valid(claims) => Ok(claims),
            failure => {
                debug!(reason = failure.failure_reason(), "access credential rejected");
                Err(AuthError::TokenInvalid)
            }
        }
    }

    /// Drop sessions idle past the refresh lifetime.
    #[instrument(skip_all, err)]
    pub async fn purge_idle(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let Some(cutoff) = self.idle_cutoff(now) else {
            return Ok(0);
        };
        let purged = self.store.purge_idle(cutoff).await?;
        if purged > 0 {
            info!(purged, "purged idle sessions");
        }
        Ok(purged)
    }

    async fn live_session(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<SessionRecord, AuthError> {
        let record = self
            .store
            .find_by_credential(refresh_token)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        if self.idle_cutoff(now).is_some_and(|cutoff| record.is_idle_since(cutoff)) {
            debug!(session_id = %record.session_id, "refresh credential past its lifetime");
            return Err(AuthError::TokenInvalid);
        }
        Ok(record)
    }

    /// Sessions last rotated before this are dead. `None` when the lifetime
    /// reaches past the start of the calendar, so nothing is.
    fn idle_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.settings.refresh_ttl)
    }

    fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.events.publish(event) {
            warn!(error = %e, "failed to publish session event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use sessionguard_events::InMemoryEventBus;

    use crate::codec::Hs256TokenCodec;
    use crate::session_store::{DeadlineSessionStore, InMemorySessionStore, RotateOutcome};
    use crate::testing::FakeDirectory;
    use sessionguard_core::SessionId;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct Fixture {
        service: AuthService,
        store: Arc<InMemorySessionStore>,
        directory: Arc<FakeDirectory>,
        bus: Arc<InMemoryEventBus<SessionEvent>>,
    }

    fn fixture() -> Fixture {
        fixture_with(AuthSettings::default())
    }

    fn fixture_with(settings: AuthSettings) -> Fixture {
        let codec = Arc::new(Hs256TokenCodec::new(SECRET, "test-realm").unwrap());
        let store = Arc::new(InMemorySessionStore::new());
        let directory = Arc::new(FakeDirectory::default());
        let bus = Arc::new(InMemoryEventBus::new());
        let service = AuthService::new(codec, store.clone(), directory.clone(), bus.clone(), settings);
        Fixture {
            service,
            store,
            directory,
            bus,
        }
    }

    async fn login(f: &Fixture, now: DateTime<Utc>) -> (IdentityId, TokenPair) {
        let id = f.directory.add_user("ada", "correct horse");
        let pair = f
            .service
            .login("ada", "correct horse", DeviceFingerprint::default(), now)
            .await
            .unwrap();
        (id, pair)
    }

    #[tokio::test]
    async fn login_issues_pair_for_identity() {
        let f = fixture();
        let now = Utc::now();
        let (id, pair) = login(&f, now).await;

        let claims = f.service.authenticate_access(&pair.access_token, now).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_rejected_without_session() {
        let f = fixture();
        f.directory.add_user("ada", "correct horse");

        let err = f
            .service
            .login("ada", "battery staple", DeviceFingerprint::default(), Utc::now())
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::InvalidCredentials);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn refresh_with_unknown_credential_is_token_invalid() {
        let f = fixture();
        let err = f
            .service
            .refresh(PresentedAccess::Absent, "no-such-value", Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::TokenInvalid);
    }

    #[tokio::test]
    async fn refresh_past_refresh_lifetime_is_token_invalid() {
        let f = fixture();
        let now = Utc::now();
        let (_, pair) = login(&f, now).await;
        let later = now + Duration::days(31);

        let err = f
            .service
            .refresh(PresentedAccess::Absent, &pair.refresh_token, later)
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::TokenInvalid);
        // Expiry alone does not mutate the store.
        assert!(f.store.find_by_credential(&pair.refresh_token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rotation_extends_refresh_lifetime() {
        let f = fixture();
        let now = Utc::now();
        let (_, pair) = login(&f, now).await;

        let day_20 = now + Duration::days(20);
        let rotated = f
            .service
            .refresh(PresentedAccess::Absent, &pair.refresh_token, day_20)
            .await
            .unwrap();
        assert!(rotated.changed);

        let day_40 = now + Duration::days(40);
        let out = f
            .service
            .refresh(PresentedAccess::Absent, &rotated.refresh_token, day_40)
            .await
            .unwrap();
        assert!(out.changed);
    }

    #[tokio::test]
    async fn logout_closes_only_that_session() {
        let f = fixture();
        let now = Utc::now();
        let (_, phone) = login(&f, now).await;
        let laptop = f
            .service
            .login("ada", "correct horse", DeviceFingerprint::default(), now)
            .await
            .unwrap();
        let events = f.bus.subscribe();

        f.service.logout(&phone.refresh_token, now).await.unwrap();

        let err = f
            .service
            .refresh(PresentedAccess::Bearer(&phone.access_token), &phone.refresh_token, now)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::TokenInvalid);

        let out = f
            .service
            .refresh(PresentedAccess::Bearer(&laptop.access_token), &laptop.refresh_token, now)
            .await
            .unwrap();
        assert!(!out.changed);

        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Closed {
                reason: CloseReason::Logout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let f = fixture();
        let now = Utc::now();
        let (_, pair) = login(&f, now).await;
        let events = f.bus.subscribe();

        f.service.logout(&pair.refresh_token, now).await.unwrap();
        f.service.logout(&pair.refresh_token, now).await.unwrap();
        f.service.logout("never-issued", now).await.unwrap();

        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err(), "only the first logout closes anything");
    }

    #[tokio::test]
    async fn revoke_identity_closes_every_session_of_that_identity() {
        let f = fixture();
        let now = Utc::now();
        let (id, first) = login(&f, now).await;
        f.service
            .login("ada", "correct horse", DeviceFingerprint::default(), now)
            .await
            .unwrap();
        let other = f.directory.add_user("grace", "hopper");
        f.service
            .login("grace", "hopper", DeviceFingerprint::default(), now)
            .await
            .unwrap();
        let events = f.bus.subscribe();

        assert_eq!(f.service.revoke_identity(id, now).await.unwrap(), 2);

        assert!(f.service.sessions_of(id, now).await.unwrap().is_empty());
        assert_eq!(f.service.sessions_of(other, now).await.unwrap().len(), 1);
        assert_eq!(
            f.service
                .refresh(PresentedAccess::Absent, &first.refresh_token, now)
                .await
                .unwrap_err(),
            AuthError::TokenInvalid
        );

        let revoked = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| {
                matches!(
                    e,
                    SessionEvent::Closed {
                        reason: CloseReason::Revoked,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(revoked, 2);
    }

    /// Opens one more session for the identity just before the bulk delete
    /// runs, like a login landing mid-revocation.
    struct LateLoginStore {
        inner: InMemorySessionStore,
    }

    #[async_trait::async_trait]
    impl SessionStore for LateLoginStore {
        async fn create(
            &self,
            identity_id: IdentityId,
            device: DeviceFingerprint,
            now: DateTime<Utc>,
        ) -> Result<SessionRecord, StoreError> {
            self.inner.create(identity_id, device, now).await
        }

        async fn find_by_credential(&self, value: &str) -> Result<Option<SessionRecord>, StoreError> {
            self.inner.find_by_credential(value).await
        }

        async fn rotate(
            &self,
            session_id: SessionId,
            expected_old_value: &str,
            new_value: &str,
            now: DateTime<Utc>,
        ) -> Result<RotateOutcome, StoreError> {
            self.inner.rotate(session_id, expected_old_value, new_value, now).await
        }

        async fn delete_by_session_id(&self, session_id: SessionId) -> Result<bool, StoreError> {
            self.inner.delete_by_session_id(session_id).await
        }

        async fn delete_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
            self.inner
                .create(identity_id, DeviceFingerprint::default(), Utc::now())
                .await?;
            self.inner.delete_by_identity(identity_id).await
        }

        async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
            self.inner.list_by_identity(identity_id).await
        }

        async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.purge_idle(before).await
        }
    }

    #[tokio::test]
    async fn revoke_identity_reports_every_session_it_removed() {
        let codec = Arc::new(Hs256TokenCodec::new(SECRET, "test-realm").unwrap());
        let store = Arc::new(LateLoginStore {
            inner: InMemorySessionStore::new(),
        });
        let directory = Arc::new(FakeDirectory::default());
        let bus: Arc<InMemoryEventBus<SessionEvent>> = Arc::new(InMemoryEventBus::new());
        let service = AuthService::new(codec, store.clone(), directory.clone(), bus.clone(), AuthSettings::default());
        let now = Utc::now();
        let id = directory.add_user("ada", "correct horse");
        let early = service
            .login("ada", "correct horse", DeviceFingerprint::default(), now)
            .await
            .unwrap();
        let early_session = store
            .find_by_credential(&early.refresh_token)
            .await
            .unwrap()
            .unwrap()
            .session_id;
        let events = bus.subscribe();

        let removed = service.revoke_identity(id, now).await.unwrap();

        let closed: Vec<SessionId> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|e| match e {
                SessionEvent::Closed {
                    session_id,
                    reason: CloseReason::Revoked,
                    ..
                } => Some(session_id),
                _ => None,
            })
            .collect();
        assert_eq!(removed, 2);
        assert_eq!(closed.len(), 2);
        assert!(closed.contains(&early_session));
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn refresh_lifetime_beyond_the_calendar_means_never_idle() {
        let f = fixture_with(AuthSettings {
            refresh_ttl: Duration::seconds(1_000_000_000_000_000),
            ..AuthSettings::default()
        });
        let now = Utc::now();
        let (id, pair) = login(&f, now).await;

        let out = f
            .service
            .refresh(PresentedAccess::Absent, &pair.refresh_token, now)
            .await
            .unwrap();
        assert!(out.changed);
        assert_eq!(f.service.sessions_of(id, now).await.unwrap().len(), 1);
        assert_eq!(f.service.purge_idle(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sessions_of_hides_idle_sessions_and_purge_removes_them() {
        let f = fixture();
        let now = Utc::now();
        let (id, _) = login(&f, now).await;
        let later = now + Duration::days(31);

        assert!(f.service.sessions_of(id, later).await.unwrap().is_empty());
        assert_eq!(f.service.purge_idle(later).await.unwrap(), 1);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn authenticate_access_rejects_refresh_value() {
        let f = fixture();
        let now = Utc::now();
        let (_, pair) = login(&f, now).await;

        assert_eq!(
            f.service.authenticate_access(&pair.refresh_token, now).unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    /// Store whose lookups never finish.
    struct HangingStore;

    #[async_trait::async_trait]
    impl SessionStore for HangingStore {
        async fn create(
            &self,
            _identity_id: IdentityId,
            _device: DeviceFingerprint,
            _now: DateTime<Utc>,
        ) -> Result<SessionRecord, StoreError> {
            std::future::pending().await
        }

        async fn find_by_credential(&self, _value: &str) -> Result<Option<SessionRecord>, StoreError> {
            std::future::pending().await
        }

        async fn rotate(
            &self,
            _session_id: SessionId,
            _expected_old_value: &str,
            _new_value: &str,
            _now: DateTime<Utc>,
        ) -> Result<RotateOutcome, StoreError> {
            std::future::pending().await
        }

        async fn delete_by_session_id(&self, _session_id: SessionId) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn delete_by_identity(&self, _identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
            std::future::pending().await
        }

        async fn list_by_identity(&self, _identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
            std::future::pending().await
        }

        async fn purge_idle(&self, _before: DateTime<Utc>) -> Result<u64, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn unreachable_store_surfaces_as_store_unavailable() {
        let codec = Arc::new(Hs256TokenCodec::new(SECRET, "test-realm").unwrap());
        let store = Arc::new(DeadlineSessionStore::new(HangingStore, StdDuration::from_millis(20)));
        let directory = Arc::new(FakeDirectory::default());
        directory.add_user("ada", "correct horse");
        let service = AuthService::new(
            codec,
            store,
            directory,
            Arc::new(InMemoryEventBus::new()),
            AuthSettings::default(),
        );

        let err = service
            .refresh(PresentedAccess::Absent, "anything", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));

        let err = service
            .login("ada", "correct horse", DeviceFingerprint::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));
    }
}
