//! Typed records, search and tag calls over an authenticated `Session`.
//!
//! Every call goes through `session_auth::Session`, so a 401 from any endpoint
//! is handled the same way: one refresh, one retry, then `Unauthenticated`.

pub use session_auth::Session;

/// Identifier of records and tags on the backend.
pub type Id = uuid::Uuid;

pub mod error;
pub mod record;
pub mod search;
pub mod tag;
