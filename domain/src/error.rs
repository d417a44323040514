//! Error types for the `domain` layer.
use session_auth::error::{Error as SessionError, ErrorKind as SessionErrorKind};
use session_auth::RequestErrorKind;
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
///
/// Errors from the session layer are translated into domain error kinds so that
/// callers (the CLI) can decide between "log in again" and "try again later"
/// without depending on `session_auth` directly. The session error is kept in
/// `source`.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Storage,
    Other(String),
}

/// Failures reported by, or on the way to, the records backend.
#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    /// The session is gone; the user has to log in again.
    Unauthenticated,
    NotFound,
    Rejected { status: u16, message: String },
    InvalidResponse,
    Network,
}

impl Error {
    pub fn is_unauthenticated(&self) -> bool {
        self.error_kind == DomainErrorKind::External(ExternalErrorKind::Unauthenticated)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            DomainErrorKind::External(ExternalErrorKind::Unauthenticated) => {
                write!(f, "Not logged in or session expired")
            }
            DomainErrorKind::External(ExternalErrorKind::NotFound) => write!(f, "Not found"),
            DomainErrorKind::External(ExternalErrorKind::Rejected { status, message }) => {
                write!(f, "Backend error ({status}): {message}")
            }
            kind => write!(f, "Domain Error: {kind:?}"),
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

// This is where we translate errors from the `session_auth` layer to the `domain` layer.
impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        let error_kind = match &err.error_kind {
            SessionErrorKind::Refresh(_) | SessionErrorKind::Request(RequestErrorKind::AuthFailure) => {
                DomainErrorKind::External(ExternalErrorKind::Unauthenticated)
            }
            SessionErrorKind::Request(RequestErrorKind::Failure { status: 404, .. }) => {
                DomainErrorKind::External(ExternalErrorKind::NotFound)
            }
            SessionErrorKind::Request(RequestErrorKind::Failure { status, message }) => {
                DomainErrorKind::External(ExternalErrorKind::Rejected {
                    status: *status,
                    message: message.clone(),
                })
            }
            SessionErrorKind::Request(RequestErrorKind::InvalidResponse) => {
                DomainErrorKind::External(ExternalErrorKind::InvalidResponse)
            }
            SessionErrorKind::Request(RequestErrorKind::Transport) | SessionErrorKind::Http(_) => {
                DomainErrorKind::External(ExternalErrorKind::Network)
            }
            SessionErrorKind::Storage(_) => DomainErrorKind::Internal(InternalErrorKind::Storage),
            SessionErrorKind::Request(RequestErrorKind::InvalidBody) | SessionErrorKind::Login(_) => {
                DomainErrorKind::Internal(InternalErrorKind::Other(err.to_string()))
            }
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
