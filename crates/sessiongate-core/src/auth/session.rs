use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};

use super::store::{StoreError, TokenKey, TokenStore};
use super::token::{Credential, TokenError};

/// Shown when the server rejects a login without saying why
const DEFAULT_LOGIN_FAILURE: &str = "Invalid credentials. Please try again.";

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("{0}")]
    Rejected(String),

    #[error("Invalid response from server")]
    InvalidResponse,

    #[error(transparent)]
    Api(ApiError),

    #[error("Failed to store tokens: {0}")]
    Store(#[from] StoreError),
}

/// Login and logout against a token store.
/// Credentials are created here and by the gate's refresh path only.
pub struct Session {
    store: Arc<dyn TokenStore>,
}

impl Session {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Authenticate with a username or email and persist the issued tokens
    pub async fn login(
        &self,
        api: &ApiClient,
        login: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<(), LoginError> {
        let pair = api
            .obtain_token(login, password, remember_me)
            .await
            .map_err(|e| match e {
                ApiError::Unauthorized(_) | ApiError::AccessDenied(_) | ApiError::Validation(_) => {
                    warn!(kind = %e.kind(), "Login rejected");
                    LoginError::Rejected(e.detail().unwrap_or_else(|| DEFAULT_LOGIN_FAILURE.to_string()))
                }
                other => LoginError::Api(other),
            })?;

        let access = pair
            .access
            .filter(|a| !a.is_empty())
            .ok_or(LoginError::InvalidResponse)?;

        // Nothing from a previous session survives a new login
        self.store.clear()?;
        self.store.set(TokenKey::Access, &access)?;
        if let Some(refresh) = pair.refresh.filter(|r| !r.is_empty()) {
            self.store.set(TokenKey::Refresh, &refresh)?;
        }
        self.store.set(TokenKey::Username, login)?;

        info!("Logged in");
        Ok(())
    }

    /// Clear session data
    pub fn logout(&self) -> Result<(), StoreError> {
        self.store.clear()?;
        info!("Logged out");
        Ok(())
    }

    pub fn username(&self) -> Result<Option<String>, StoreError> {
        self.store.get(TokenKey::Username)
    }

    /// Decode the stored credential, if any.
    pub fn credential(&self) -> Result<Option<Result<Credential, TokenError>>, StoreError> {
        let Some(access) = self.store.get(TokenKey::Access)? else {
            return Ok(None);
        };
        let refresh = self.store.get(TokenKey::Refresh)?;
        Ok(Some(Credential::from_tokens(access, refresh)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryStore;
    use crate::auth::token::unsigned_token;

    #[test]
    fn test_logout_clears_everything() {
        let store = Arc::new(MemoryStore::with_entries([
            (TokenKey::Access, "a1"),
            (TokenKey::Refresh, "r1"),
            (TokenKey::Username, "alice"),
        ]));
        let session = Session::new(store.clone());
        assert_eq!(session.username().unwrap().as_deref(), Some("alice"));

        session.logout().unwrap();
        assert!(store.snapshot().is_empty());
        assert_eq!(session.username().unwrap(), None);
        assert!(session.credential().unwrap().is_none());
    }

    #[test]
    fn test_credential_decodes_stored_tokens() {
        let exp = chrono::Utc::now().timestamp() + 600;
        let access = unsigned_token(exp);
        let store = Arc::new(MemoryStore::with_entries([
            (TokenKey::Access, access.as_str()),
            (TokenKey::Refresh, "r1"),
        ]));
        let session = Session::new(store);

        let cred = session.credential().unwrap().unwrap().unwrap();
        assert_eq!(cred.expires_at.timestamp(), exp);
        assert_eq!(cred.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn test_credential_reports_malformed_token() {
        let store = Arc::new(MemoryStore::with_entries([(TokenKey::Access, "junk")]));
        let session = Session::new(store);
        assert!(matches!(session.credential().unwrap(), Some(Err(_))));
    }
}
