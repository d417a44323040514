//! Credential handoff from the interactive login window.
//!
//! The login window posts `{access_token, refresh_token}` back to the
//! application once the backend finishes the OAuth exchange. The sender's
//! origin is the only thing that makes such a message trustworthy.

use std::sync::Arc;

use log::*;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::state::SessionPublisher;
use crate::store::{TokenPair, TokenStore};

/// A cross-window message: the sender's origin plus an untrusted payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowMessage {
    pub origin: String,
    #[serde(default)]
    pub data: Value,
}

impl WindowMessage {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// Why a message was not acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRejection {
    /// Sent from somewhere other than the backend.
    UntrustedOrigin(String),
    /// From the backend, but not a credential message.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Rejected(MessageRejection),
}

pub struct CredentialChannel {
    trusted_origin: String,
    tokens: TokenStore,
    publisher: Arc<SessionPublisher>,
}

impl CredentialChannel {
    pub fn new(
        trusted_origin: impl Into<String>,
        tokens: TokenStore,
        publisher: Arc<SessionPublisher>,
    ) -> Self {
        Self {
            trusted_origin: trusted_origin.into(),
            tokens,
            publisher,
        }
    }

    pub fn trusted_origin(&self) -> &str {
        &self.trusted_origin
    }

    /// Commits the token pair carried by `message` if it comes from the
    /// trusted origin. Rejections are reported, never raised; only a store
    /// failure is an error.
    pub async fn handle(&self, message: &WindowMessage) -> Result<Delivery, Error> {
        if message.origin != self.trusted_origin {
            warn!(
                "Ignoring credential message from untrusted origin {}",
                message.origin
            );
            return Ok(Delivery::Rejected(MessageRejection::UntrustedOrigin(
                message.origin.clone(),
            )));
        }

        let Some(pair) = token_pair(&message.data) else {
            debug!("Ignoring message without a token pair");
            return Ok(Delivery::Rejected(MessageRejection::Malformed));
        };

        let _guard = self.tokens.write_guard().await;
        self.tokens.commit_pair(&pair).await?;
        self.publisher.publish(Some(pair.access_token));
        info!("Session established from login window");
        Ok(Delivery::Accepted)
    }

    /// Handles messages until the sending side closes.
    pub fn listen(self: Arc<Self>, mut messages: mpsc::Receiver<WindowMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                if let Err(e) = self.handle(&message).await {
                    error!("Could not store delivered credentials: {}", e);
                }
            }
            debug!("Credential channel closed");
        })
    }
}

fn token_pair(data: &Value) -> Option<TokenPair> {
    let access_token = data.get("access_token")?.as_str()?;
    let refresh_token = data.get("refresh_token")?.as_str()?;
    if access_token.is_empty() || refresh_token.is_empty() {
        return None;
    }
    Some(TokenPair::new(access_token, refresh_token))
}
