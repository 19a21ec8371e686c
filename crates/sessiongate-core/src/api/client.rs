//! API client for the auth backend.
//!
//! This module provides the `ApiClient` struct. Every request re-reads the
//! access token from the injected `TokenStore` and attaches it as a bearer
//! credential, so a refresh performed elsewhere is picked up immediately.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{RefreshOutcome, Refresher, TokenKey, TokenStore};
use crate::config::Config;

use super::{ApiError, FailureKind};

// ============================================================================
// Constants
// ============================================================================

/// Login endpoint (accepts username or email)
const TOKEN_PATH: &str = "/api/token/";

/// Access token refresh endpoint
const REFRESH_PATH: &str = "/api/token/refresh/";

/// Details of the authenticated user
const CURRENT_USER_PATH: &str = "/api/user/current/";

/// Maximum number of retries for rate-limited (429) GET requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: Option<String>,
}

/// Tokens issued by a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// HTTP client wrapper.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
}

impl ApiClient {
    /// Create a new API client against `base_url`
    pub fn new(base_url: &str, store: Arc<dyn TokenStore>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
        })
    }

    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        Self::new(
            &config.api_base_url,
            store,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let token = match self.store.get(TokenKey::Access) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Token store unavailable, sending request without credentials");
                None
            }
        };
        if let Some(token) = token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers()?)
                .send()
                .await?;

            match Self::check_response(response).await {
                Ok(response) => return Self::decode(response, &url).await,
                Err(ApiError::RateLimited) if retries < MAX_RATE_LIMIT_RETRIES => {
                    retries += 1;
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single-shot POST. Never retried.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(body)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::decode(response, &url).await
    }

    /// Exchange a username or email plus password for a token pair
    pub async fn obtain_token(&self, login: &str, password: &str, remember_me: bool) -> Result<TokenPair, ApiError> {
        debug!(remember_me, "Requesting token pair");
        self.post(
            TOKEN_PATH,
            &LoginRequest {
                login,
                password,
                remember_me,
            },
        )
        .await
    }

    /// Ask the auth service for a new access token.
    /// Only a 200 carrying an `access` field counts as success.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> RefreshOutcome {
        let url = self.url(REFRESH_PATH);
        let response = match self
            .client
            .post(&url)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Token refresh request failed");
                return RefreshOutcome::Failed {
                    kind: FailureKind::Network,
                };
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let kind = ApiError::from_status(status, &body).kind();
            // A 2xx other than 200 falls outside the taxonomy
            let kind = if status.is_success() { FailureKind::InvalidResponse } else { kind };
            debug!(%status, %kind, "Token refresh rejected");
            return RefreshOutcome::Failed { kind };
        }

        match Self::decode::<RefreshResponse>(response, &url).await {
            Ok(RefreshResponse {
                access: Some(access),
            }) if !access.is_empty() => RefreshOutcome::Renewed { access },
            Ok(_) => {
                warn!("Token refresh response carried no access token");
                RefreshOutcome::Failed {
                    kind: FailureKind::InvalidResponse,
                }
            }
            Err(e) => {
                warn!(error = %e, "Token refresh response could not be decoded");
                RefreshOutcome::Failed { kind: e.kind() }
            }
        }
    }

    /// Fetch the profile of the user the access token belongs to
    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.get(CURRENT_USER_PATH).await
    }
}

#[async_trait]
impl Refresher for ApiClient {
    async fn refresh(&self, refresh_token: &str) -> RefreshOutcome {
        self.refresh_access_token(refresh_token).await
    }
}
