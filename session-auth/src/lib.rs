//! Client-side session and token lifecycle management.
//!
//! This crate keeps one usable access token available to outgoing API calls:
//!
//! - **Token store**: the access/refresh pair in a durable, origin-scoped store
//! - **Refresh coordination**: at most one renewal call in flight, shared by every caller
//! - **Authenticated requests**: bearer credential attached, one refresh-and-retry on 401
//! - **Expiry scheduling**: renewal shortly before the access token expires
//! - **Credential handoff**: token pairs delivered by the login window, checked by origin
//! - **Session state**: a single observable authenticated flag
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use session_auth::{FileStore, Session, SessionConfig};
//!
//! let config = SessionConfig::new("http://localhost:8000/api", "http://localhost:8000");
//! let store = Arc::new(FileStore::new(".records-client", "http://localhost:8000"));
//! let session = Session::start(config, store).await?;
//! let url = session.login_url().await?;
//! ```

pub mod backend;
pub mod channel;
pub mod error;
pub mod http;
pub mod jwt;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod store;

pub use backend::{AuthBackend, HttpAuthBackend};
pub use channel::{CredentialChannel, Delivery, MessageRejection, WindowMessage};
pub use error::{Error, ErrorKind, RefreshErrorKind, RequestErrorKind};
pub use http::ApiRequest;
pub use jwt::{decode_claims, is_token_expired, Claims};
pub use session::{Session, SessionConfig};
pub use state::SessionPublisher;
pub use store::{FileStore, KeyValueStore, MemoryStore, TokenPair, TokenStore};

// Re-export secrecy so callers can name token types without a direct dependency.
pub use secrecy;
