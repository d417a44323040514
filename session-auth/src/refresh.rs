//! Single-flight access token renewal.

use std::sync::{Arc, Mutex, MutexGuard};

use log::*;
use secrecy::SecretString;
use tokio::sync::watch;

use crate::backend::AuthBackend;
use crate::error::{Error, RefreshErrorKind, RefreshFailure};
use crate::state::SessionPublisher;
use crate::store::TokenStore;

type Outcome = Result<SecretString, RefreshFailure>;

/// Ensures at most one renewal call is outstanding and shares its outcome.
///
/// Concurrent callers join the refresh already in flight instead of starting a
/// second one. The renewal runs on its own task, so a caller that stops waiting
/// never strands the others.
///
/// Every renewal records the session generation it started in. If the session
/// was torn down by the time the backend answers, the answer is discarded and
/// all waiters see `RefreshErrorKind::Superseded`.
pub struct RefreshCoordinator {
    backend: Arc<dyn AuthBackend>,
    tokens: TokenStore,
    publisher: Arc<SessionPublisher>,
    in_flight: Mutex<Option<watch::Receiver<Option<Outcome>>>>,
}

impl RefreshCoordinator {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        tokens: TokenStore,
        publisher: Arc<SessionPublisher>,
    ) -> Self {
        Self {
            backend,
            tokens,
            publisher,
            in_flight: Mutex::new(None),
        }
    }

    /// True while a renewal call is outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight_slot().is_some()
    }

    /// Returns a renewed access token, joining any refresh already in flight.
    pub async fn refresh_access_token(self: &Arc<Self>) -> Result<SecretString, Error> {
        let mut rx = self.join_or_start();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome
            .unwrap_or_else(|| {
                Err(RefreshFailure::new(
                    RefreshErrorKind::Transport,
                    "Refresh ended without an outcome",
                ))
            })
            .map_err(Error::from)
    }

    /// Clears the stored pair, starts a new generation and publishes
    /// "unauthenticated".
    pub async fn end_session(&self) {
        let _guard = self.tokens.write_guard().await;
        self.end_session_locked().await;
    }

    fn join_or_start(self: &Arc<Self>) -> watch::Receiver<Option<Outcome>> {
        let mut slot = self.in_flight_slot();
        // A closed channel means the refresh task died before settling.
        if let Some(rx) = slot.as_ref().filter(|rx| rx.has_changed().is_ok()) {
            debug!("Joining in-flight token refresh");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        drop(slot);

        let coordinator = self.clone();
        tokio::spawn(async move {
            let outcome = coordinator.run().await;
            coordinator.in_flight_slot().take();
            tx.send_replace(Some(outcome));
        });
        rx
    }

    async fn run(&self) -> Outcome {
        let generation = self.publisher.generation();

        let outcome = match self.tokens.refresh_token().await {
            Ok(Some(refresh_token)) => self.backend.refresh(&refresh_token).await,
            Ok(None) => Err(RefreshFailure::new(
                RefreshErrorKind::NoRefreshToken,
                "No refresh token stored",
            )),
            Err(e) => {
                warn!("Could not read refresh token: {}", e);
                Err(RefreshFailure::new(
                    RefreshErrorKind::NoRefreshToken,
                    e.to_string(),
                ))
            }
        };

        let _guard = self.tokens.write_guard().await;
        if self.publisher.generation() != generation {
            info!("Session ended while refreshing, discarding the result");
            return Err(RefreshFailure::new(
                RefreshErrorKind::Superseded,
                "Session ended during refresh",
            ));
        }

        match outcome {
            Ok(access_token) => {
                if let Err(e) = self.tokens.replace_access_token(&access_token).await {
                    warn!("Could not persist refreshed access token: {}", e);
                }
                self.publisher.publish(Some(access_token.clone()));
                debug!("Access token refreshed");
                Ok(access_token)
            }
            Err(failure) => {
                warn!("Token refresh failed, ending session: {}", failure.message);
                self.end_session_locked().await;
                Err(failure)
            }
        }
    }

    /// Caller must hold the token store's write guard.
    async fn end_session_locked(&self) {
        self.publisher.invalidate();
        if let Err(e) = self.tokens.clear().await {
            error!("Could not clear token store: {}", e);
        }
        self.publisher.publish(None);
    }

    fn in_flight_slot(&self) -> MutexGuard<'_, Option<watch::Receiver<Option<Outcome>>>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HttpAuthBackend;
    use crate::error::ErrorKind;
    use crate::http::ApiClientBuilder;
    use crate::store::{MemoryStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use async_trait::async_trait;
    use secrecy::ExposeSecret;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Backend whose refresh blocks until the test hands out a permit.
    struct GatedBackend {
        calls: AtomicUsize,
        gate: Semaphore,
        outcome: Outcome,
    }

    impl GatedBackend {
        fn new(permits: usize, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(permits),
                outcome,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn wait_for_call(&self) {
            while self.calls() == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl AuthBackend for GatedBackend {
        async fn login_url(&self) -> Result<String, Error> {
            Ok("https://login.example.com".to_string())
        }

        async fn refresh(&self, _refresh_token: &SecretString) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await;
            self.outcome.clone()
        }

        async fn logout(&self, _access_token: &SecretString) -> Result<(), Error> {
            Ok(())
        }
    }

    fn coordinator<'a>(
        backend: Arc<dyn AuthBackend>,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> (Arc<RefreshCoordinator>, TokenStore, Arc<SessionPublisher>) {
        let tokens = TokenStore::new(Arc::new(MemoryStore::with_entries(entries)));
        let publisher = Arc::new(SessionPublisher::new());
        publisher.publish(Some(SecretString::new("at1".to_string())));
        let coordinator = Arc::new(RefreshCoordinator::new(
            backend,
            tokens.clone(),
            publisher.clone(),
        ));
        (coordinator, tokens, publisher)
    }

    const SESSION: [(&str, &str); 2] = [(ACCESS_TOKEN_KEY, "at1"), (REFRESH_TOKEN_KEY, "rt1")];

    fn success(token: &str) -> Outcome {
        Ok(SecretString::new(token.to_string()))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let backend = GatedBackend::new(0, success("at2"));
        let (coordinator, tokens, publisher) = coordinator(backend.clone(), SESSION);

        let (a, b, c, ()) = tokio::join!(
            coordinator.refresh_access_token(),
            coordinator.refresh_access_token(),
            coordinator.refresh_access_token(),
            async {
                backend.wait_for_call().await;
                assert!(coordinator.is_refreshing());
                backend.gate.add_permits(1);
            }
        );

        assert_eq!(backend.calls(), 1);
        for token in [a, b, c] {
            assert_eq!(token.unwrap().expose_secret(), "at2");
        }
        assert_eq!(
            tokens.access_token().await.unwrap().unwrap().expose_secret(),
            "at2"
        );
        assert_eq!(
            tokens.refresh_token().await.unwrap().unwrap().expose_secret(),
            "rt1"
        );
        assert!(publisher.is_authenticated());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let backend = GatedBackend::new(
            0,
            Err(RefreshFailure::new(RefreshErrorKind::Rejected, "revoked")),
        );
        let (coordinator, tokens, publisher) = coordinator(backend.clone(), SESSION);
        let generation = publisher.generation();

        let (a, b, ()) = tokio::join!(
            coordinator.refresh_access_token(),
            coordinator.refresh_access_token(),
            async {
                backend.wait_for_call().await;
                backend.gate.add_permits(1);
            }
        );

        assert_eq!(backend.calls(), 1);
        for result in [a, b] {
            let err = result.unwrap_err();
            assert_eq!(err.error_kind, ErrorKind::Refresh(RefreshErrorKind::Rejected));
        }
        assert!(tokens.pair().await.unwrap().is_none());
        assert!(tokens.access_token().await.unwrap().is_none());
        assert!(!publisher.is_authenticated());
        assert_eq!(publisher.generation(), generation + 1);
    }

    #[tokio::test]
    async fn test_settled_refresh_is_not_reused() {
        let backend = GatedBackend::new(10, success("at2"));
        let (coordinator, _, _) = coordinator(backend.clone(), SESSION);

        coordinator.refresh_access_token().await.unwrap();
        coordinator.refresh_access_token().await.unwrap();

        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_fails_without_backend_call() {
        let backend = GatedBackend::new(10, success("at2"));
        let (coordinator, tokens, publisher) =
            coordinator(backend.clone(), [(ACCESS_TOKEN_KEY, "at1")]);

        let err = coordinator.refresh_access_token().await.unwrap_err();

        assert_eq!(
            err.error_kind,
            ErrorKind::Refresh(RefreshErrorKind::NoRefreshToken)
        );
        assert!(err.is_auth_failure());
        assert_eq!(backend.calls(), 0);
        assert!(tokens.access_token().await.unwrap().is_none());
        assert!(!publisher.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_settling_after_logout_does_not_resurrect_session() {
        let backend = GatedBackend::new(0, success("at2"));
        let (coordinator, tokens, publisher) = coordinator(backend.clone(), SESSION);

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh_access_token().await })
        };
        backend.wait_for_call().await;

        coordinator.end_session().await;
        backend.gate.add_permits(1);

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Refresh(RefreshErrorKind::Superseded));
        assert!(tokens.access_token().await.unwrap().is_none());
        assert!(tokens.refresh_token().await.unwrap().is_none());
        assert!(!publisher.is_authenticated());
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_strand_joiners() {
        let backend = GatedBackend::new(0, success("at2"));
        let (coordinator, _, _) = coordinator(backend.clone(), SESSION);

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh_access_token().await })
        };
        backend.wait_for_call().await;
        first.abort();

        let (second, ()) = tokio::join!(coordinator.refresh_access_token(), async {
            backend.gate.add_permits(1);
        });

        assert_eq!(second.unwrap().expose_secret(), "at2");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_many_callers_hit_refresh_endpoint_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at2"}"#)
            .expect(1)
            .create_async()
            .await;
        let client = ApiClientBuilder::new(format!("{}/api", server.url()))
            .with_max_retries(0)
            .build()
            .unwrap();
        let (coordinator, _, _) = coordinator(Arc::new(HttpAuthBackend::new(client)), SESSION);

        let (a, b, c, d) = tokio::join!(
            coordinator.refresh_access_token(),
            coordinator.refresh_access_token(),
            coordinator.refresh_access_token(),
            coordinator.refresh_access_token(),
        );

        for token in [a, b, c, d] {
            assert_eq!(token.unwrap().expose_secret(), "at2");
        }
        mock.assert_async().await;
    }
}
