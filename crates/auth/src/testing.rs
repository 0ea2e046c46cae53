//! Test doubles shared by this crate's unit tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use sessionguard_core::IdentityId;

use crate::identity::{DirectoryError, Identity, IdentityDirectory};

/// Directory backed by a map of `id -> (login, password)`.
#[derive(Default)]
pub(crate) struct FakeDirectory {
    users: RwLock<HashMap<IdentityId, (String, String)>>,
}

impl FakeDirectory {
    /// Register an identity that can only be looked up, not logged into.
    pub(crate) fn add(&self, id: IdentityId) {
        self.users
            .write()
            .unwrap()
            .insert(id, (id.to_string(), String::new()));
    }

    pub(crate) fn add_user(&self, login: &str, password: &str) -> IdentityId {
        let id = IdentityId::new();
        self.users
            .write()
            .unwrap()
            .insert(id, (login.to_string(), password.to_string()));
        id
    }

    pub(crate) fn remove(&self, id: IdentityId) {
        self.users.write().unwrap().remove(&id);
    }
}

#[async_trait]
impl IdentityDirectory for FakeDirectory {
    async fn find(&self, id: IdentityId) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.users.read().unwrap().get(&id).map(|(login, _)| Identity {
            id,
            login: login.clone(),
        }))
    }

    async fn authenticate(&self, login: &str, password: &str) -> Result<Option<Identity>, DirectoryError> {
        Ok(self
            .users
            .read()
            .unwrap()
            .iter()
            .find(|(_, (l, p))| l == login && !p.is_empty() && p == password)
            .map(|(id, (l, _))| Identity {
                id: *id,
                login: l.clone(),
            }))
    }
}
