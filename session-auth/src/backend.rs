//! The token-issuing backend, as seen by the client.

use async_trait::async_trait;
use log::*;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{
    login_error, Error, ErrorKind, LoginErrorKind, RefreshErrorKind, RefreshFailure,
};
use crate::http::{error_message, ApiClient};

/// Authentication endpoints consumed by the session.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// URL the interactive login window should open.
    async fn login_url(&self) -> Result<String, Error>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<SecretString, RefreshFailure>;

    /// Tells the backend the session is over. Callers treat failure as non-fatal.
    async fn logout(&self, access_token: &SecretString) -> Result<(), Error>;
}

#[derive(Debug, Deserialize)]
struct LoginUrlResponse {
    url: String,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// `AuthBackend` over the `/auth/*` HTTP endpoints.
pub struct HttpAuthBackend {
    client: ApiClient,
}

impl HttpAuthBackend {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login_url(&self) -> Result<String, Error> {
        let response = self
            .client
            .request(Method::GET, "/auth/login")
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to fetch login URL: {:?}", e);
                Error {
                    source: Some(Box::new(e)),
                    error_kind: ErrorKind::Login(LoginErrorKind::UrlUnavailable),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.bytes().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            warn!("Login URL request failed: {}", message);
            return Err(login_error(LoginErrorKind::UrlUnavailable, &message));
        }

        let body: LoginUrlResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse login URL response: {:?}", e);
            Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Login(LoginErrorKind::UrlUnavailable),
            }
        })?;
        Ok(body.url)
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<SecretString, RefreshFailure> {
        debug!("Refreshing access token");

        let response = self
            .client
            .request(Method::POST, "/auth/refresh")
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| {
                warn!("Failed to reach refresh endpoint: {:?}", e);
                RefreshFailure::new(RefreshErrorKind::Transport, e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.bytes().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            warn!("Refresh token rejected ({}): {}", status, message);
            return Err(RefreshFailure::new(RefreshErrorKind::Rejected, message));
        }

        let body: RefreshResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse refresh response: {:?}", e);
            RefreshFailure::new(RefreshErrorKind::Rejected, "Invalid refresh response")
        })?;
        if body.access_token.is_empty() {
            return Err(RefreshFailure::new(
                RefreshErrorKind::Rejected,
                "Refresh response carried an empty access token",
            ));
        }

        info!("Successfully refreshed access token");
        Ok(SecretString::new(body.access_token))
    }

    async fn logout(&self, access_token: &SecretString) -> Result<(), Error> {
        let response = self
            .client
            .request(Method::POST, "/auth/logout")
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}
