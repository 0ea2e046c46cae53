//! Identity directory boundary (owned by user management, consumed here).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sessionguard_core::IdentityId;

/// An authenticated principal, as far as this crate needs to know it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub login: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("identity directory unavailable: {0}")]
    Unavailable(String),
}

/// Lookup and password check for identities.
///
/// Password storage and hashing policy are the implementation's business.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Return the identity if it still exists.
    async fn find(&self, id: IdentityId) -> Result<Option<Identity>, DirectoryError>;

    /// Check `password` for `login`. `None` for unknown login or wrong password,
    /// without saying which.
    async fn authenticate(&self, login: &str, password: &str) -> Result<Option<Identity>, DirectoryError>;
}

#[async_trait]
impl<D> IdentityDirectory for std::sync::Arc<D>
where
    D: IdentityDirectory + ?Sized,
{
    async fn find(&self, id: IdentityId) -> Result<Option<Identity>, DirectoryError> {
        (**self).find(id).await
    }

    async fn authenticate(&self, login: &str, password: &str) -> Result<Option<Identity>, DirectoryError> {
        (**self).authenticate(login, password).await
    }
}
