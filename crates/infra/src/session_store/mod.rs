//! Durable `SessionStore` backends.

pub mod postgres;

pub use postgres::PostgresSessionStore;
