//! The session facade wiring every component together.

use std::sync::Arc;
use std::time::Duration;

use log::*;
use reqwest::Response;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backend::{AuthBackend, HttpAuthBackend};
use crate::channel::{CredentialChannel, Delivery, WindowMessage};
use crate::error::Error;
use crate::http::{ApiClient, ApiClientBuilder, ApiRequest, RequestExecutor};
use crate::refresh::RefreshCoordinator;
use crate::scheduler::{ExpiryScheduler, DEFAULT_LEAD_TIME};
use crate::state::{SessionPublisher, Subscriber};
use crate::store::{KeyValueStore, TokenStore};

/// Settings for a `Session`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the backend API, e.g. `http://localhost:8000/api`.
    pub api_base_url: String,
    /// Origin that credential messages must come from.
    pub trusted_origin: String,
    pub refresh_lead_time: Duration,
    pub logout_timeout: Duration,
    pub request_timeout: Duration,
    pub max_transient_retries: u32,
    /// Overrides the HTTP client's default user agent.
    pub user_agent: Option<String>,
}

impl SessionConfig {
    pub fn new(api_base_url: impl Into<String>, trusted_origin: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            trusted_origin: trusted_origin.into(),
            refresh_lead_time: DEFAULT_LEAD_TIME,
            logout_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_transient_retries: 2,
            user_agent: None,
        }
    }

    pub fn with_refresh_lead_time(mut self, lead_time: Duration) -> Self {
        self.refresh_lead_time = lead_time;
        self
    }

    pub fn with_logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn client(&self) -> Result<ApiClient, Error> {
        let mut builder = ApiClientBuilder::new(self.api_base_url.clone())
            .with_timeout(self.request_timeout)
            .with_max_retries(self.max_transient_retries);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.with_user_agent(user_agent.clone());
        }
        Ok(builder.build()?)
    }
}

/// A client-side session against one backend.
///
/// Owns the token store, the refresh coordinator, the expiry scheduler and
/// the credential channel. Dropping the session stops its background tasks.
pub struct Session {
    backend: Arc<dyn AuthBackend>,
    tokens: TokenStore,
    publisher: Arc<SessionPublisher>,
    coordinator: Arc<RefreshCoordinator>,
    executor: RequestExecutor,
    scheduler: Arc<ExpiryScheduler>,
    channel: Arc<CredentialChannel>,
    logout_timeout: Duration,
    driver: JoinHandle<()>,
}

impl Session {
    /// Starts a session over the HTTP backend at `config.api_base_url`.
    pub async fn start(config: SessionConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, Error> {
        let client = config.client()?;
        let backend = Arc::new(HttpAuthBackend::new(client.clone()));
        Self::assemble(config, client, backend, store).await
    }

    /// Starts a session whose authentication calls go to `backend`.
    pub async fn with_backend(
        config: SessionConfig,
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, Error> {
        let client = config.client()?;
        Self::assemble(config, client, backend, store).await
    }

    async fn assemble(
        config: SessionConfig,
        client: ApiClient,
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, Error> {
        let tokens = TokenStore::new(store);
        let pair = tokens.repair().await?;

        let publisher = Arc::new(SessionPublisher::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            backend.clone(),
            tokens.clone(),
            publisher.clone(),
        ));
        let executor = RequestExecutor::new(client, tokens.clone(), coordinator.clone());
        let scheduler = Arc::new(ExpiryScheduler::new(
            coordinator.clone(),
            publisher.clone(),
            config.refresh_lead_time,
        ));
        let channel = Arc::new(CredentialChannel::new(
            config.trusted_origin,
            tokens.clone(),
            publisher.clone(),
        ));

        publisher.publish(pair.map(|pair| pair.access_token));
        let driver = scheduler.follow(publisher.watch_tokens());

        info!(
            "Session started against {} ({})",
            config.api_base_url,
            if publisher.is_authenticated() {
                "authenticated"
            } else {
                "unauthenticated"
            }
        );

        Ok(Self {
            backend,
            tokens,
            publisher,
            coordinator,
            executor,
            scheduler,
            channel,
            logout_timeout: config.logout_timeout,
            driver,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.publisher.is_authenticated()
    }

    /// Installs the single state subscriber, replacing any previous one. The
    /// current state is replayed to it immediately.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let subscriber: Subscriber = Arc::new(subscriber);
        self.publisher.subscribe(subscriber);
    }

    pub fn unsubscribe(&self) {
        self.publisher.unsubscribe();
    }

    /// Follows committed access tokens.
    pub fn watch_tokens(&self) -> watch::Receiver<Option<SecretString>> {
        self.publisher.watch_tokens()
    }

    /// URL to open for interactive login.
    pub async fn login_url(&self) -> Result<String, Error> {
        self.backend.login_url().await
    }

    /// Feeds one cross-window message to the credential channel.
    pub async fn deliver(&self, message: &WindowMessage) -> Result<Delivery, Error> {
        self.channel.handle(message).await
    }

    /// Feeds cross-window messages to the credential channel until `messages` closes.
    pub fn listen(&self, messages: mpsc::Receiver<WindowMessage>) -> JoinHandle<()> {
        self.channel.clone().listen(messages)
    }

    pub fn trusted_origin(&self) -> &str {
        self.channel.trusted_origin()
    }

    /// Ends the session.
    ///
    /// The backend is told on a best-effort basis, bounded by the logout
    /// timeout. Local state is cleared whatever the backend does.
    pub async fn logout(&self) {
        match self.tokens.access_token().await {
            Ok(Some(access_token)) => {
                match tokio::time::timeout(self.logout_timeout, self.backend.logout(&access_token))
                    .await
                {
                    Ok(Ok(())) => debug!("Backend acknowledged logout"),
                    Ok(Err(e)) => warn!("Backend logout failed: {}", e),
                    Err(_) => warn!(
                        "Backend logout timed out after {}s",
                        self.logout_timeout.as_secs_f32()
                    ),
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read access token for logout: {}", e),
        }

        self.scheduler.cancel();
        self.coordinator.end_session().await;
        info!("Logged out");
    }

    pub async fn refresh_access_token(&self) -> Result<SecretString, Error> {
        self.coordinator.refresh_access_token().await
    }

    pub async fn send(&self, request: &ApiRequest) -> Result<Response, Error> {
        self.executor.send(request).await
    }

    pub async fn request_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, Error> {
        self.executor.request_json(request).await
    }

    pub async fn request_empty(&self, request: &ApiRequest) -> Result<(), Error> {
        self.executor.request_empty(request).await
    }

    /// True while a renewal timer is pending.
    pub fn renewal_scheduled(&self) -> bool {
        self.scheduler.is_armed()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
        self.scheduler.cancel();
    }
}
