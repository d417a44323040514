//! HTTP plumbing: the middleware client and the authenticated request executor.

mod client;
mod executor;
mod request;

pub use client::{ApiClient, ApiClientBuilder};
pub use executor::RequestExecutor;
pub use request::ApiRequest;

pub(crate) use executor::error_message;
