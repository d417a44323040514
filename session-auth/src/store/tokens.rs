//! Token pair persistence on top of a `KeyValueStore`.

use std::sync::Arc;

use log::*;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, MutexGuard};

use super::KeyValueStore;
use crate::error::Error;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Access and refresh token held together once a session exists.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            refresh_token: SecretString::new(refresh_token.into()),
        }
    }
}

/// Reads and writes the two token entries.
///
/// The entries are separate keys, so a crash between the two writes of
/// `commit_pair` or `clear` can leave one of them behind. `repair` removes such
/// a stray entry; it runs once when a session starts.
///
/// Components that change the session (login, refresh, logout) hold
/// `write_guard` across their check-then-write sequence.
#[derive(Clone)]
pub struct TokenStore {
    kv: Arc<dyn KeyValueStore>,
    writes: Arc<Mutex<()>>,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Serializes session-changing writes across clones of this store.
    pub async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    pub async fn access_token(&self) -> Result<Option<SecretString>, Error> {
        Ok(self.kv.get(ACCESS_TOKEN_KEY).await?.map(SecretString::new))
    }

    pub async fn refresh_token(&self) -> Result<Option<SecretString>, Error> {
        Ok(self.kv.get(REFRESH_TOKEN_KEY).await?.map(SecretString::new))
    }

    /// Both tokens, or `None` unless both are present.
    pub async fn pair(&self) -> Result<Option<TokenPair>, Error> {
        let access_token = self.access_token().await?;
        let refresh_token = self.refresh_token().await?;
        Ok(match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token)) => Some(TokenPair {
                access_token,
                refresh_token,
            }),
            _ => None,
        })
    }

    /// Writes access then refresh token.
    pub async fn commit_pair(&self, pair: &TokenPair) -> Result<(), Error> {
        self.kv
            .set(ACCESS_TOKEN_KEY, pair.access_token.expose_secret())
            .await?;
        self.kv
            .set(REFRESH_TOKEN_KEY, pair.refresh_token.expose_secret())
            .await
    }

    /// Replaces the access token of an existing session after a refresh.
    pub async fn replace_access_token(&self, access_token: &SecretString) -> Result<(), Error> {
        self.kv
            .set(ACCESS_TOKEN_KEY, access_token.expose_secret())
            .await
    }

    /// Removes refresh then access token.
    ///
    /// The refresh token goes first so that an interrupted clear never leaves a
    /// renewable session behind.
    pub async fn clear(&self) -> Result<(), Error> {
        self.kv.remove(REFRESH_TOKEN_KEY).await?;
        self.kv.remove(ACCESS_TOKEN_KEY).await
    }

    /// Enforces "both or neither" on a store that may hold a torn pair.
    ///
    /// Returns the surviving pair, if any.
    pub async fn repair(&self) -> Result<Option<TokenPair>, Error> {
        let access_token = self.access_token().await?;
        let refresh_token = self.refresh_token().await?;
        match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(TokenPair {
                access_token,
                refresh_token,
            })),
            (None, None) => Ok(None),
            _ => {
                warn!("Token store held a lone token, clearing it");
                self.clear().await?;
                Ok(None)
            }
        }
    }
}
