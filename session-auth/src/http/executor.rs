//! Authenticated request execution with a single refresh-and-retry on 401.

use std::sync::Arc;

use log::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ApiClient, ApiRequest};
use crate::error::{request_error, Error, ErrorKind, RequestErrorKind};
use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;

/// Message used when a failed response carries no readable explanation.
pub const GENERIC_ERROR_MESSAGE: &str = "API error";

pub struct RequestExecutor {
    client: ApiClient,
    tokens: TokenStore,
    coordinator: Arc<RefreshCoordinator>,
}

impl RequestExecutor {
    pub fn new(client: ApiClient, tokens: TokenStore, coordinator: Arc<RefreshCoordinator>) -> Self {
        Self {
            client,
            tokens,
            coordinator,
        }
    }

    /// Sends `request` with the stored credential and returns the final response.
    ///
    /// A 401 to a credentialed request triggers one refresh and one retry. The
    /// retry's response is returned as is, whatever its status.
    pub async fn send(&self, request: &ApiRequest) -> Result<Response, Error> {
        let token = self.tokens.access_token().await?;
        let response = self.dispatch(request, token.as_ref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || token.is_none() {
            return Ok(response);
        }

        debug!(
            "{} {} returned 401, renewing the access token",
            request.method, request.endpoint
        );
        drop(response);
        let fresh = match self.coordinator.refresh_access_token().await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(
                    "Could not renew the access token for {} {}: {}",
                    request.method, request.endpoint, e
                );
                return Err(Error {
                    source: Some(Box::new(e)),
                    error_kind: ErrorKind::Request(RequestErrorKind::AuthFailure),
                });
            }
        };

        self.dispatch(request, Some(&fresh)).await
    }

    /// Sends `request` and parses a 2xx body as `T`.
    pub async fn request_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, Error> {
        let response = ensure_success(self.send(request).await?).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e.into()))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(
                "Unexpected response shape from {} {}: {}",
                request.method, request.endpoint, e
            );
            Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Request(RequestErrorKind::InvalidResponse),
            }
        })
    }

    /// Sends `request` and accepts any 2xx, ignoring the body.
    pub async fn request_empty(&self, request: &ApiRequest) -> Result<(), Error> {
        ensure_success(self.send(request).await?).await?;
        Ok(())
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&SecretString>,
    ) -> Result<Response, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in request.headers.iter() {
            if name == AUTHORIZATION && token.is_some() {
                warn!(
                    "Ignoring caller Authorization header on {} {}",
                    request.method, request.endpoint
                );
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        let mut builder = self
            .client
            .request(request.method.clone(), &request.endpoint)
            .headers(headers);
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder.send().await.map_err(|e| {
            warn!("{} {} failed: {}", request.method, request.endpoint, e);
            transport_error(e)
        })
    }
}

/// Converts a non-2xx response into a typed failure.
pub(crate) async fn ensure_success(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.bytes().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());
    if status == StatusCode::UNAUTHORIZED {
        return Err(request_error(RequestErrorKind::AuthFailure, &message));
    }
    Err(request_error(
        RequestErrorKind::Failure {
            status: status.as_u16(),
            message: message.clone(),
        },
        &message,
    ))
}

/// Reads the explanation out of a backend error body.
///
/// `message` wins over `detail`. A structured `detail` (validation errors) is
/// returned as its JSON text.
pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    if let Some(message) = value.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    match value.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn transport_error(e: reqwest_middleware::Error) -> Error {
    Error {
        source: Some(Box::new(e)),
        error_kind: ErrorKind::Request(RequestErrorKind::Transport),
    }
}
