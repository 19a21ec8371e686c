//! Session authorization gate.
//!
//! Each check starts from `SessionState::Unknown` and resolves to either
//! `Authorized` or `Unauthorized`. Nothing is cached between checks.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::api::FailureKind;
use crate::config::Config;

use super::refresh::{RefreshCoordinator, Refresher};
use super::store::{TokenKey, TokenStore};
use super::token;

/// Why a check ended unauthorized. Callers redirect the same way for
/// every reason; the distinction is kept for logging and messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No access token stored: never logged in, or logged out
    NoAccessToken,
    /// Access token could not be decoded
    MalformedToken,
    /// Access token expired and there is no refresh token
    NoRefreshToken,
    /// Access token expired and the refresh call failed
    RefreshFailed(FailureKind),
    /// Refresh task ended without a result
    RefreshAborted,
    /// Token store could not be read or written
    StoreUnavailable,
}

impl DenyReason {
    /// True when a session existed but has lapsed.
    pub fn is_expired_session(&self) -> bool {
        matches!(
            self,
            DenyReason::NoRefreshToken | DenyReason::RefreshFailed(_) | DenyReason::RefreshAborted
        )
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::NoAccessToken => f.write_str("not logged in"),
            DenyReason::MalformedToken => f.write_str("stored access token is malformed"),
            DenyReason::NoRefreshToken => f.write_str("session expired"),
            DenyReason::RefreshFailed(kind) => write!(f, "session expired, refresh failed ({})", kind),
            DenyReason::RefreshAborted => f.write_str("session expired, refresh interrupted"),
            DenyReason::StoreUnavailable => f.write_str("token store unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Authorized,
    Unauthorized(DenyReason),
}

impl SessionState {
    pub fn is_authorized(&self) -> bool {
        matches!(self, SessionState::Authorized)
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionState::Unknown)
    }
}

/// What a guarded view does after a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Render(T),
    Redirect { location: String, reason: DenyReason },
}

pub struct SessionGate {
    store: Arc<dyn TokenStore>,
    refresher: RefreshCoordinator,
    login_path: String,
    leeway: Duration,
}

impl SessionGate {
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn Refresher>, login_path: impl Into<String>) -> Self {
        Self {
            refresher: RefreshCoordinator::new(refresher, Arc::clone(&store)),
            store,
            login_path: login_path.into(),
            leeway: Duration::zero(),
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>, refresher: Arc<dyn Refresher>) -> Self {
        // Out-of-range values saturate; such a leeway refreshes on every check
        let leeway = Duration::try_seconds(config.refresh_leeway_secs.max(0)).unwrap_or(Duration::MAX);
        Self::new(store, refresher, config.login_path.clone()).with_leeway(leeway)
    }

    /// Treat tokens as expired this long before their `exp` instant
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub async fn check(&self) -> SessionState {
        self.check_at(Utc::now()).await
    }

    /// Resolve the session against the given clock reading
    pub async fn check_at(&self, now: DateTime<Utc>) -> SessionState {
        let state = match self.resolve(now).await {
            Ok(()) => SessionState::Authorized,
            Err(reason) => {
                debug!(%reason, "Session unauthorized");
                SessionState::Unauthorized(reason)
            }
        };
        debug_assert!(state.is_resolved());
        state
    }

    /// Check the session, then render on success or hand back the login redirect.
    pub async fn guard<T, F>(&self, render: F) -> Guarded<T>
    where
        F: FnOnce() -> T,
    {
        match self.check().await {
            SessionState::Authorized => Guarded::Render(render()),
            SessionState::Unauthorized(reason) => Guarded::Redirect {
                location: self.login_path.clone(),
                reason,
            },
            // check() never yields Unknown
            SessionState::Unknown => Guarded::Redirect {
                location: self.login_path.clone(),
                reason: DenyReason::NoAccessToken,
            },
        }
    }

    async fn resolve(&self, now: DateTime<Utc>) -> Result<(), DenyReason> {
        let access = self
            .read(TokenKey::Access)?
            .ok_or(DenyReason::NoAccessToken)?;

        let expires_at = token::expiry(&access).map_err(|e| {
            debug!(error = %e, "Access token could not be decoded");
            DenyReason::MalformedToken
        })?;

        // Valid through the `exp` instant itself. A deadline that underflows
        // the calendar counts as expired.
        match expires_at.checked_sub_signed(self.leeway) {
            Some(deadline) if deadline >= now => {
                debug!(%expires_at, "Access token still valid");
                return Ok(());
            }
            _ => {}
        }

        debug!(%expires_at, "Access token expired, refreshing");
        let refresh = self
            .read(TokenKey::Refresh)?
            .ok_or(DenyReason::NoRefreshToken)?;
        self.refresher.refresh(&refresh).await
    }

    fn read(&self, key: TokenKey) -> Result<Option<String>, DenyReason> {
        self.store.get(key).map_err(|e| {
            debug!(key = key.as_str(), error = %e, "Token store read failed");
            DenyReason::StoreUnavailable
        })
    }
}
