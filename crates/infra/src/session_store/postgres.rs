//! Postgres-backed session store.
//!
//! ## Schema
//!
//! One row per session in `auth_sessions`. `credential_value` carries a
//! unique constraint, which is what makes a rotated-away value unresolvable
//! and a colliding new value detectable.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `DuplicateCredential` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / PoolTimedOut / Io / other | N/A | `Unavailable` |
//!
//! ## Atomicity
//!
//! Every trait method is a single statement, so cancelling a call (for
//! example by `DeadlineSessionStore`) never leaves half an operation behind.
//! `rotate` is `UPDATE ... WHERE session_id = $1 AND credential_value = $2`;
//! zero affected rows means the compare-and-swap lost.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use sessionguard_auth::session_store::MAX_CREATE_ATTEMPTS;
use sessionguard_auth::{
    DeviceFingerprint, RotateOutcome, SessionRecord, SessionStore, StoreError, generate_refresh_value,
};
use sessionguard_core::{IdentityId, SessionId};

const SESSION_COLUMNS: &str =
    "session_id, credential_value, identity_id, device_ip, device_user_agent, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
    generate: fn() -> String,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            generate: generate_refresh_value,
        }
    }

    /// Connect a small pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Use a custom credential generator (tests exercise collisions with this).
    pub fn with_generator(mut self, generate: fn() -> String) -> Self {
        self.generate = generate;
        self
    }

    /// Create the sessions table and its indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_sessions (
                session_id        UUID PRIMARY KEY,
                credential_value  TEXT NOT NULL,
                identity_id       UUID NOT NULL,
                device_ip         TEXT NULL,
                device_user_agent TEXT NULL,
                created_at        TIMESTAMPTZ NOT NULL,
                updated_at        TIMESTAMPTZ NOT NULL,
                CONSTRAINT auth_sessions_credential_value_key UNIQUE (credential_value)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS auth_sessions_identity_idx ON auth_sessions (identity_id)")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS auth_sessions_updated_at_idx ON auth_sessions (updated_at)")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip(self, device), fields(identity_id = %identity_id), err)]
    async fn create(
        &self,
        identity_id: IdentityId,
        device: DeviceFingerprint,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, StoreError> {
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let value = (self.generate)();
            let inserted = sqlx::query(&format!(
                r#"
                INSERT INTO auth_sessions ({SESSION_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $6)
                RETURNING {SESSION_COLUMNS}
                "#
            ))
            .bind(SessionId::new().as_uuid())
            .bind(value.as_str())
            .bind(identity_id.as_uuid())
            .bind(device.ip.as_deref())
            .bind(device.user_agent.as_deref())
            .bind(now)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create", e));

            match inserted {
                Ok(row) => return decode(&row),
                Err(StoreError::DuplicateCredential) => {
                    debug!(attempt, "generated credential value collided, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::DuplicateCredential)
    }

    #[instrument(skip_all, err)]
    async fn find_by_credential(&self, value: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions WHERE credential_value = $1"
        ))
        .bind(value)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_credential", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self, expected_old_value, new_value), fields(session_id = %session_id), err)]
    async fn rotate(
        &self,
        session_id: SessionId,
        expected_old_value: &str,
        new_value: &str,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE auth_sessions
            SET credential_value = $3, updated_at = $4
            WHERE session_id = $1 AND credential_value = $2
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id.as_uuid())
        .bind(expected_old_value)
        .bind(new_value)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("rotate", e))?;

        match row {
            Some(row) => Ok(RotateOutcome::Rotated(decode(&row)?)),
            None => Ok(RotateOutcome::Conflict),
        }
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn delete_by_session_id(&self, session_id: SessionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE session_id = $1")
            .bind(session_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_by_session_id", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(identity_id = %identity_id), err)]
    async fn delete_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "DELETE FROM auth_sessions WHERE identity_id = $1 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(identity_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_by_identity", e))?;

        let mut removed = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        removed.sort_by_key(|r| r.created_at);
        Ok(removed)
    }

    #[instrument(skip(self), fields(identity_id = %identity_id), err)]
    async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<SessionRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions WHERE identity_id = $1 ORDER BY created_at ASC, session_id ASC"
        ))
        .bind(identity_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_identity", e))?;

        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self), err)]
    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE updated_at < $1")
            .bind(before)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_idle", e))?;
        Ok(result.rows_affected())
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                StoreError::DuplicateCredential
            } else {
                StoreError::Unavailable(format!("database error in {}: {}", operation, db_err.message()))
            }
        }
        sqlx::Error::PoolClosed => StoreError::Unavailable(format!("connection pool closed in {}", operation)),
        sqlx::Error::PoolTimedOut => StoreError::Unavailable(format!("connection pool timed out in {}", operation)),
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode(row: &PgRow) -> Result<SessionRecord, StoreError> {
    SessionRow::from_row(row)
        .map(Into::into)
        .map_err(|e| StoreError::Unavailable(format!("failed to decode session row: {}", e)))
}

// SQLx row types

#[derive(Debug)]
struct SessionRow {
    session_id: Uuid,
    credential_value: String,
    identity_id: Uuid,
    device_ip: Option<String>,
    device_user_agent: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for SessionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            session_id: row.try_get("session_id")?,
            credential_value: row.try_get("credential_value")?,
            identity_id: row.try_get("identity_id")?,
            device_ip: row.try_get("device_ip")?,
            device_user_agent: row.try_get("device_user_agent")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        SessionRecord {
            session_id: SessionId::from_uuid(row.session_id),
            credential_value: row.credential_value,
            identity_id: IdentityId::from_uuid(row.identity_id),
            device: DeviceFingerprint {
                ip: row.device_ip,
                user_agent: row.device_user_agent,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
