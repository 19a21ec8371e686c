//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the login redirect path, the token
//! storage backend and the last used username.
//!
//! Configuration is stored at `~/.config/sessiongate/config.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::auth::{FileStore, KeyringStore, MemoryStore, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessiongate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "SESSIONGATE_API_URL";

const DEFAULT_API_BASE_URL: &str = "https://my-fullsctack-web.onrender.com";

const DEFAULT_LOGIN_PATH: &str = "/login";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub login_path: String,
    pub storage: StorageBackend,
    pub refresh_leeway_secs: i64,
    pub request_timeout_secs: u64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            storage: StorageBackend::default(),
            refresh_leeway_secs: 0,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Self::from_json(&contents)?
        } else {
            Self::default()
        };
        config.apply_api_url_override(std::env::var(API_URL_ENV).ok());
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Non-empty override wins over the file value
    pub fn apply_api_url_override(&mut self, value: Option<String>) {
        if let Some(url) = value.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Open the configured token store
    pub fn open_store(&self) -> Result<Arc<dyn TokenStore>> {
        Ok(match self.storage {
            StorageBackend::File => Arc::new(FileStore::new(self.cache_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStore::new()),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = Config::from_json(r#"{"storage": "keyring", "last_username": "alice"}"#).unwrap();
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.last_username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_unknown_storage_backend_is_rejected() {
        assert!(Config::from_json(r#"{"storage": "cookie"}"#).is_err());
    }

    #[test]
    fn test_api_url_override() {
        let mut config = Config::default();
        config.apply_api_url_override(None);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);

        config.apply_api_url_override(Some("   ".to_string()));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);

        config.apply_api_url_override(Some(" http://localhost:8000 ".to_string()));
        assert_eq!(config.api_base_url, "http://localhost:8000");
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = Config {
            refresh_leeway_secs: 30,
            storage: StorageBackend::Memory,
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""storage":"memory""#));
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }
}
