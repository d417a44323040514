//! Backend HTTP client with transport retry middleware.
//!
//! Only idempotent requests go through the retry middleware. A POST is sent
//! once, so neither `POST /auth/refresh` nor record creation is ever repeated
//! behind the caller's back.

use std::time::Duration;

use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub(crate) struct HttpClientConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Retries for connection errors and 5xx responses on idempotent requests.
    /// Never applied to 401s.
    pub max_retries: u32,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            user_agent: format!("records-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Client bound to one backend base URL.
#[derive(Clone, Debug)]
pub struct ApiClient {
    retrying: ClientWithMiddleware,
    single_shot: ClientWithMiddleware,
    base_url: String,
}

impl ApiClient {
    /// Base URL with no trailing slash, e.g. `http://localhost:8000/api`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves `endpoint` (which starts with `/`) against the base URL.
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    pub fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let http = if is_idempotent(&method) {
            &self.retrying
        } else {
            &self.single_shot
        };
        http.request(method, self.url(endpoint))
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

/// Builder for `ApiClient`.
pub struct ApiClientBuilder {
    config: HttpClientConfig,
    base_url: String,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: HttpClientConfig::default(),
            base_url: base_url.into(),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the maximum number of transport retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<ApiClient, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent)
            .build()?;

        let single_shot = ClientBuilder::new(client.clone()).build();
        let retrying = if self.config.max_retries > 0 {
            let policy =
                ExponentialBackoff::builder().build_with_max_retries(self.config.max_retries);
            ClientBuilder::new(client)
                .with(RetryTransientMiddleware::new_with_policy(policy))
                .build()
        } else {
            single_shot.clone()
        };

        Ok(ApiClient {
            retrying,
            single_shot,
            base_url: self.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = ApiClientBuilder::new("http://localhost:8000/api");
        assert_eq!(builder.config.timeout, Duration::from_secs(30));
        assert_eq!(builder.config.max_retries, 2);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = ApiClientBuilder::new("http://localhost:8000/api")
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(0);
        assert_eq!(builder.config.timeout, Duration::from_secs(5));
        assert_eq!(builder.config.max_retries, 0);
    }

    #[tokio::test]
    async fn test_url_resolution() {
        let client = ApiClientBuilder::new("http://localhost:8000/api/")
            .build()
            .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(client.url("/tags/"), "http://localhost:8000/api/tags/");
        assert_eq!(client.url("auth/login"), "http://localhost:8000/api/auth/login");
    }

    #[test]
    fn test_only_idempotent_methods_retry() {
        assert!(is_idempotent(&Method::GET));
        assert!(is_idempotent(&Method::PUT));
        assert!(is_idempotent(&Method::DELETE));
        assert!(!is_idempotent(&Method::POST));
        assert!(!is_idempotent(&Method::PATCH));
    }

    #[tokio::test]
    async fn test_post_is_sent_once_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/records/")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let client = ApiClientBuilder::new(format!("{}/api", server.url()))
            .with_max_retries(2)
            .build()
            .unwrap();

        let response = client.request(Method::POST, "/records/").send().await.unwrap();

        assert_eq!(response.status(), 500);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_user_agent_is_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags/")
            .match_header("user-agent", "records_client/9.9.9")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let client = ApiClientBuilder::new(format!("{}/api", server.url()))
            .with_user_agent("records_client/9.9.9")
            .build()
            .unwrap();

        client.request(Method::GET, "/tags/").send().await.unwrap();
        mock.assert_async().await;
    }
}
