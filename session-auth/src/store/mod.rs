//! Durable storage for the session's token pair.

mod file;
mod memory;
mod tokens;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use tokens::{TokenPair, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

use async_trait::async_trait;

use crate::error::Error;

/// A durable, origin-scoped key-value store of strings.
///
/// No atomicity is promised across keys. Writes to two keys are two writes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), Error>;
}
