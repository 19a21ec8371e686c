//! sessiongate core library.
//!
//! Guards protected views behind a session check: the stored access token
//! is decoded locally, refreshed through the auth service when expired, and
//! the check resolves to `Authorized` or a redirect to the login path.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, FailureKind};
pub use auth::{DenyReason, Guarded, Session, SessionGate, SessionState, TokenKey, TokenStore};
pub use config::{Config, StorageBackend};
