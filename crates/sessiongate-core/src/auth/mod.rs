//! Authentication module for guarding protected views.
//!
//! This module provides:
//! - `TokenStore`: injected persistence for the access/refresh tokens
//! - `SessionGate`: per-check authorization with token refresh
//! - `RefreshCoordinator`: single-flight refresh shared by concurrent checks
//! - `Session`: login and logout
//!
//! Access tokens are decoded locally to read their `exp` claim; nothing
//! else about them is interpreted.

pub mod gate;
pub mod refresh;
pub mod session;
pub mod store;
pub mod token;

pub use gate::{DenyReason, Guarded, SessionGate, SessionState};
pub use refresh::{RefreshCoordinator, RefreshOutcome, Refresher};
pub use session::{LoginError, Session};
pub use store::{FileStore, KeyringStore, MemoryStore, StoreError, TokenKey, TokenStore};
pub use token::{Credential, TokenError};
