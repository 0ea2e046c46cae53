//! In-process identity directory with Argon2 password hashes.
//!
//! Stands in for a real user-management service in dev and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use sessionguard_auth::{DirectoryError, Identity, IdentityDirectory};
use sessionguard_core::IdentityId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("login already taken: {0}")]
    LoginTaken(String),

    #[error("login and password must not be empty")]
    Empty,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("directory lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone)]
struct Account {
    login: String,
    password_hash: String,
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityDirectory {
    accounts: RwLock<HashMap<IdentityId, Account>>,
}

impl InMemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account; the password is stored only as an Argon2 PHC string.
    pub fn register(&self, login: &str, password: &str) -> Result<IdentityId, RegistrationError> {
        if login.trim().is_empty() || password.is_empty() {
            return Err(RegistrationError::Empty);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| RegistrationError::Hashing(e.to_string()))?
            .to_string();

        let mut accounts = self.accounts.write().map_err(|_| RegistrationError::Poisoned)?;
        if accounts.values().any(|a| a.login == login) {
            return Err(RegistrationError::LoginTaken(login.to_string()));
        }

        let id = IdentityId::new();
        accounts.insert(
            id,
            Account {
                login: login.to_string(),
                password_hash,
            },
        );
        info!(identity_id = %id, login, "identity registered");
        Ok(id)
    }

    /// Delete an account. Its sessions stay in the session store.
    pub fn remove(&self, id: IdentityId) -> bool {
        self.accounts
            .write()
            .map(|mut accounts| accounts.remove(&id).is_some())
            .unwrap_or(false)
    }

    fn poisoned() -> DirectoryError {
        DirectoryError::Unavailable("directory lock poisoned".to_string())
    }
}

fn verify_password(hash: &str, plain: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default().verify_password(plain.as_bytes(), &parsed_hash).is_ok()
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn find(&self, id: IdentityId) -> Result<Option<Identity>, DirectoryError> {
        let accounts = self.accounts.read().map_err(|_| Self::poisoned())?;
        Ok(accounts.get(&id).map(|a| Identity {
            id,
            login: a.login.clone(),
        }))
    }

    async fn authenticate(&self, login: &str, password: &str) -> Result<Option<Identity>, DirectoryError> {
        let candidate = {
            let accounts = self.accounts.read().map_err(|_| Self::poisoned())?;
            accounts
                .iter()
                .find(|(_, a)| a.login == login)
                .map(|(id, a)| (*id, a.clone()))
        };

        Ok(candidate.and_then(|(id, account)| {
            verify_password(&account.password_hash, password).then_some(Identity {
                id,
                login: account.login,
            })
        }))
    }
}
