use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sessionguard_core::{IdentityId, SessionId};

use super::{DeviceFingerprint, MAX_CREATE_ATTEMPTS, RotateOutcome, SessionRecord, SessionStore, StoreError};
use crate::credential::generate_refresh_value;

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<SessionId, SessionRecord>,
    /// Unique index: credential value -> owning session.
    by_credential: HashMap<String, SessionId>,
}

/// In-memory session store.
///
/// Intended for tests/dev. Both maps sit behind one lock, so every operation
/// (in particular the rotate compare-and-swap) is atomic with respect to all
/// others.
#[derive(Debug)]
pub struct InMemorySessionStore {
    tables: RwLock<Tables>,
    generate: fn() -> String,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_generator(generate_refresh_value)
    }

    /// Use a custom credential generator (tests exercise collisions with this).
    pub fn with_generator(generate: fn() -> String) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            generate,
        }
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("lock poisoned".to_string())
    }
}

impl Tables {
    fn remove(&mut self, session_id: SessionId) -> Option<SessionRecord> {
        let record = self.sessions.remove(&session_id)?;
        self.by_credential.remove(&record.credential_value);
        Some(record)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        identity_id: IdentityId,
        device: DeviceFingerprint,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let value = (self.generate)();
            if tables.by_credential.contains_key(&value) {
                continue;
            }

            let record = SessionRecord {
                session_id: SessionId::new(),
                credential_value: value.clone(),
                identity_id,
                device,
                created_at: now,
                updated_at: now,
            };
            tables.by_credential.insert(value, record.session_id);
            tables.sessions.insert(record.session_id, record.clone());
            return Ok(record);
        }

        Err(StoreError::DuplicateCredential)
    }

    async fn find_by_credential(&self, value: &str) -> Result<Option<SessionRecord>, StoreError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;

        Ok(tables
            .by_credential
            .get(value)
            .and_then(|id| tables.sessions.get(id))
            .cloned())
    }

    async fn rotate(
        &self,
        session_id: SessionId,
        expected_old_value: &str,
        new_value: &str,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;

        match tables.sessions.get(&session_id) {
            Some(record) if record.credential_value == expected_old_value => {}
            _ => return Ok(RotateOutcome::Conflict),
        }
        if tables.by_credential.contains_key(new_value) {
            return Err(StoreError::DuplicateCredential);
        }

        tables.by_credential.remove(expected_old_value);
        tables.by_credential.insert(new_value.to_string(), session_id);

        let record = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::Unavailable("session vanished under write lock".to_string()))?;
        record.credential_value = new_value.to_string();
        record.updated_at = now;

        Ok(RotateOutcome::Rotated(record.clone()))
    }

    async fn delete_by_session_id(&self, session_id: SessionId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        Ok(tables.remove(session_id).is_some())
    }

    async fn delete_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;

        let doomed: Vec<SessionId> = tables
            .sessions
            .values()
            .filter(|r| r.identity_id == identity_id)
            .map(|r| r.session_id)
            .collect();
        let mut removed: Vec<SessionRecord> = doomed.into_iter().filter_map(|id| tables.remove(id)).collect();
        removed.sort_by_key(|r| r.created_at);

        Ok(removed)
    }

    async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;

        let mut records: Vec<SessionRecord> = tables
            .sessions
            .values()
            .filter(|r| r.identity_id == identity_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);

        Ok(records)
    }

    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;

        let doomed: Vec<SessionId> = tables
            .sessions
            .values()
            .filter(|r| r.is_idle_since(before))
            .map(|r| r.session_id)
            .collect();
        for id in &doomed {
            tables.remove(*id);
        }

        Ok(doomed.len() as u64)
    }
}
