//! REST API client module for the auth backend.
//!
//! This module provides the `ApiClient` for logging in, refreshing access
//! tokens and calling protected endpoints. Failed requests are classified
//! into `ApiError` / `FailureKind`.
//!
//! Authentication uses JWT bearer tokens read from the token store on
//! every request.

pub mod client;
pub mod error;

pub use client::{ApiClient, TokenPair, UserProfile};
pub use error::{ApiError, FailureKind};
