//! Persistent token storage.
//!
//! A `TokenStore` is a dumb key-value layer: no validation, no expiry
//! bookkeeping. The gate and the HTTP client both receive one as an
//! injected `Arc<dyn TokenStore>`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;

/// Token file name in cache directory
const TOKEN_FILE: &str = "tokens.json";

/// Keychain service name for `KeyringStore`
const SERVICE_NAME: &str = "sessiongate";

/// Keys the application owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenKey {
    Access,
    Refresh,
    Username,
}

impl TokenKey {
    pub const ALL: [TokenKey; 3] = [TokenKey::Access, TokenKey::Refresh, TokenKey::Username];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKey::Access => "access",
            TokenKey::Refresh => "refresh",
            TokenKey::Username => "username",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),
}

pub trait TokenStore: Send + Sync {
    fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError>;

    fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError>;

    /// Remove every key the application owns
    fn clear(&self) -> Result<(), StoreError>;
}

/// In-process store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<TokenKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with the given entries
    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (TokenKey, &'a str)>) -> Self {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        Self {
            entries: Mutex::new(map),
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> BTreeMap<TokenKey, String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<TokenKey, String>> {
        // A panic while holding the lock cannot leave a half-written map
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryStore {
    fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(&key).cloned())
    }

    fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        self.lock().insert(key, value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.lock().clear();
        Ok(())
    }
}

/// JSON file in the cache directory. Survives restarts.
pub struct FileStore {
    cache_dir: PathBuf,
    // Serializes reads and read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            lock: Mutex::new(()),
        }
    }

    fn token_path(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let path = self.token_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        // Replace the file atomically so readers in other processes never
        // observe a truncated file
        let mut staged = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        staged.write_all(contents.as_bytes())?;
        staged.flush()?;
        staged.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for FileStore {
    fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        let _guard = self.guard();
        Ok(self.read_all()?.remove(key.as_str()))
    }

    fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut entries = self.read_all()?;
        entries.insert(key.as_str().to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.guard();
        let path = self.token_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// OS keychain, one entry per key under the `sessiongate` service.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: TokenKey) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, key.as_str())?)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringStore {
    fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        for key in TokenKey::ALL {
            match self.entry(key)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
