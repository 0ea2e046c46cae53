use chrono::{DateTime, Utc};

use sessionguard_core::IdentityId;

/// Principal context for a request (identity behind a verified access token).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    identity_id: IdentityId,
    expires_at: DateTime<Utc>,
}

impl PrincipalContext {
    pub fn new(identity_id: IdentityId, expires_at: DateTime<Utc>) -> Self {
        Self {
            identity_id,
            expires_at,
        }
    }

    pub fn identity_id(&self) -> IdentityId {
        self.identity_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}
