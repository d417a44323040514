//! Error types for the `session-auth` crate.
//!
//! A root `Error` struct carries an error kind plus an optional source for chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for session-auth.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in session-auth.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Refresh(RefreshErrorKind),
    Request(RequestErrorKind),
    Login(LoginErrorKind),
    Storage(StorageErrorKind),
    Http(HttpErrorKind),
}

/// Errors from renewing the access token.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshErrorKind {
    /// Renewal was attempted with no stored refresh token.
    NoRefreshToken,
    /// The backend declined the refresh token.
    Rejected,
    /// The refresh endpoint could not be reached.
    Transport,
    /// The session ended (logout) while the refresh was in flight.
    Superseded,
}

/// Errors from authenticated API requests.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestErrorKind {
    /// 401 that survived the refresh-and-retry path.
    AuthFailure,
    /// Any other non-2xx response.
    Failure { status: u16, message: String },
    /// A 2xx body that did not match the declared response shape.
    InvalidResponse,
    /// The request body could not be serialized.
    InvalidBody,
    /// The request never produced a response.
    Transport,
}

/// Errors from starting an interactive login.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginErrorKind {
    UrlUnavailable,
}

/// Errors from the durable key-value store.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageErrorKind {
    Read,
    Write,
    Corrupt,
}

/// Errors from HTTP client operations.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Network,
}

impl Error {
    /// True when the caller should send the user back to the login experience.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Refresh(_) | ErrorKind::Request(RequestErrorKind::AuthFailure)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Refresh(kind) => write!(f, "Token refresh error: {:?}", kind),
            ErrorKind::Request(RequestErrorKind::Failure { status, message }) => {
                write!(f, "Request failed ({}): {}", status, message)
            }
            ErrorKind::Request(kind) => write!(f, "Request error: {:?}", kind),
            ErrorKind::Login(kind) => write!(f, "Login error: {:?}", kind),
            ErrorKind::Storage(kind) => write!(f, "Storage error: {:?}", kind),
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            other => Error {
                source: Some(Box::new(other)),
                error_kind: ErrorKind::Http(HttpErrorKind::Network),
            },
        }
    }
}

/// The outcome shared by every caller waiting on one refresh.
///
/// `Error` owns a boxed source and cannot be cloned, so the fan-out carries this
/// instead and each waiter converts it back into an `Error`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshFailure {
    pub kind: RefreshErrorKind,
    pub message: String,
}

impl RefreshFailure {
    pub fn new(kind: RefreshErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<RefreshFailure> for Error {
    fn from(failure: RefreshFailure) -> Self {
        refresh_error(failure.kind, &failure.message)
    }
}

/// Helper function to create refresh errors.
pub fn refresh_error(kind: RefreshErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Refresh(kind),
    }
}

/// Helper function to create request errors.
pub fn request_error(kind: RequestErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Request(kind),
    }
}

/// Helper function to create login errors.
pub fn login_error(kind: LoginErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Login(kind),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(
    kind: StorageErrorKind,
    source: impl Into<Box<dyn StdError + Send + Sync>>,
) -> Error {
    Error {
        source: Some(source.into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_failure_converts_to_error() {
        let failure = RefreshFailure::new(RefreshErrorKind::Rejected, "refresh token revoked");
        let err: Error = failure.into();
        assert_eq!(err.error_kind, ErrorKind::Refresh(RefreshErrorKind::Rejected));
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("refresh token revoked".to_string())
        );
    }

    #[test]
    fn test_auth_failures_are_flagged() {
        assert!(refresh_error(RefreshErrorKind::NoRefreshToken, "none").is_auth_failure());
        assert!(request_error(RequestErrorKind::AuthFailure, "401").is_auth_failure());
        assert!(!request_error(
            RequestErrorKind::Failure {
                status: 500,
                message: "boom".into()
            },
            "500"
        )
        .is_auth_failure());
    }

    #[test]
    fn test_failure_display_carries_backend_message() {
        let err = request_error(
            RequestErrorKind::Failure {
                status: 404,
                message: "Record not found".into(),
            },
            "Record not found",
        );
        assert_eq!(err.to_string(), "Request failed (404): Record not found");
    }
}
