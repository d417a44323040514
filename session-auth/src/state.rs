//! Observable session state.
//!
//! The publisher is the single writer of the authenticated flag. It keeps one
//! replaceable subscriber (the UI binding) and a watch channel of the latest
//! committed access token for components that follow token commits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::*;
use secrecy::SecretString;
use tokio::sync::watch;

/// Callback receiving the authenticated flag on every publish.
pub type Subscriber = Arc<dyn Fn(bool) + Send + Sync>;

pub struct SessionPublisher {
    authenticated: AtomicBool,
    subscriber: Mutex<Option<Subscriber>>,
    token_tx: watch::Sender<Option<SecretString>>,
    generation: AtomicU64,
}

impl SessionPublisher {
    pub fn new() -> Self {
        let (token_tx, _) = watch::channel(None);
        Self {
            authenticated: AtomicBool::new(false),
            subscriber: Mutex::new(None),
            token_tx,
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Publishes the current access token, or `None` once the session is gone.
    ///
    /// The subscriber runs after every internal lock is released, so it may call
    /// back into the publisher.
    pub fn publish(&self, access_token: Option<SecretString>) {
        let authenticated = access_token.is_some();
        let previous = self.authenticated.swap(authenticated, Ordering::SeqCst);
        if previous != authenticated {
            info!(
                "Session is now {}",
                if authenticated { "authenticated" } else { "unauthenticated" }
            );
        }
        self.token_tx.send_replace(access_token);

        let subscriber = self.subscriber_slot().clone();
        if let Some(subscriber) = subscriber {
            subscriber(authenticated);
        }
    }

    /// Installs `subscriber`, replacing any previous one, and replays the
    /// current state to it.
    pub fn subscribe(&self, subscriber: Subscriber) {
        *self.subscriber_slot() = Some(subscriber.clone());
        subscriber(self.is_authenticated());
    }

    pub fn unsubscribe(&self) {
        self.subscriber_slot().take();
    }

    /// Follows committed access tokens. `None` means logged out.
    pub fn watch_tokens(&self) -> watch::Receiver<Option<SecretString>> {
        self.token_tx.subscribe()
    }

    /// Current session generation. It changes whenever the session is torn down.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Starts a new generation, making every in-flight refresh result stale.
    pub fn invalidate(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn subscriber_slot(&self) -> std::sync::MutexGuard<'_, Option<Subscriber>> {
        self.subscriber.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionPublisher {
    fn default() -> Self {
        Self::new()
    }
}
