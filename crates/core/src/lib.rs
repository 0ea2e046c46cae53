//! `sessionguard-core` — identifiers and error primitives shared by every crate.
//!
//! This crate contains **pure** building blocks (no IO, no async).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{IdentityId, SessionId};
