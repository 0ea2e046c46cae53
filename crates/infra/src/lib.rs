//! Infrastructure layer: Postgres session storage, identity directory, config.

pub mod config;
pub mod directory;
pub mod session_store;

pub use config::{AppConfig, ConfigError};
pub use directory::{InMemoryIdentityDirectory, RegistrationError};
pub use session_store::PostgresSessionStore;
