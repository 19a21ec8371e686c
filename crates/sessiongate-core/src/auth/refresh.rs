//! Access token refresh.
//!
//! `Refresher` is the seam to the auth service. `RefreshCoordinator` runs at
//! most one refresh per refresh token at a time; concurrent callers holding
//! the same refresh token await the same spawned task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::api::FailureKind;

use super::gate::DenyReason;
use super::store::{TokenKey, TokenStore};

/// Result of one refresh call, decoded at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Renewed { access: String },
    Failed { kind: FailureKind },
}

#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> RefreshOutcome;
}

type InFlight = Shared<BoxFuture<'static, Result<(), DenyReason>>>;

pub struct RefreshCoordinator {
    refresher: Arc<dyn Refresher>,
    store: Arc<dyn TokenStore>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn Refresher>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            refresher,
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Refresh the access token and write it to the store.
    ///
    /// Must be called from within a tokio runtime. The refresh keeps running
    /// and its result is still stored if every caller stops waiting.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(), DenyReason> {
        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(refresh_token) {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let pending = self.spawn(refresh_token.to_string());
                    in_flight.insert(refresh_token.to_string(), pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Number of refreshes currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn spawn(&self, refresh_token: String) -> InFlight {
        let refresher = Arc::clone(&self.refresher);
        let store = Arc::clone(&self.store);
        let task_in_flight = Arc::clone(&self.in_flight);
        let refresh_token_key = refresh_token.clone();

        let task = tokio::spawn(async move {
            let outcome = refresher.refresh(&refresh_token).await;
            let result = match outcome {
                RefreshOutcome::Renewed { access } => match store.set(TokenKey::Access, &access) {
                    Ok(()) => {
                        info!("Access token refreshed");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Refreshed access token could not be stored");
                        Err(DenyReason::StoreUnavailable)
                    }
                },
                RefreshOutcome::Failed { kind } => {
                    info!(%kind, "Access token refresh failed");
                    Err(DenyReason::RefreshFailed(kind))
                }
            };
            // The entry is inserted before the lock is released, so it is
            // always present here.
            task_in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&refresh_token);
            result
        });

        let in_flight = Arc::clone(&self.in_flight);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Token refresh task did not complete");
                    in_flight.lock().unwrap_or_else(|e| e.into_inner()).remove(&refresh_token_key);
                    Err(DenyReason::RefreshAborted)
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Refresher for SlowRefresher {
        async fn refresh(&self, refresh_token: &str) -> RefreshOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            RefreshOutcome::Renewed {
                access: format!("new-for-{}", refresh_token),
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let refresher = Arc::new(SlowRefresher {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let coordinator = RefreshCoordinator::new(refresher.clone(), store.clone());

        let (a, b, c) = tokio::join!(
            coordinator.refresh("r1"),
            coordinator.refresh("r1"),
            coordinator.refresh("r1"),
        );
        assert_eq!((a, b, c), (Ok(()), Ok(()), Ok(())));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(TokenKey::Access).unwrap().as_deref(), Some("new-for-r1"));
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_refresh_tokens_are_not_merged() {
        let refresher = Arc::new(SlowRefresher {
            calls: AtomicUsize::new(0),
        });
        let coordinator = RefreshCoordinator::new(refresher.clone(), Arc::new(MemoryStore::new()));

        let (a, b) = tokio::join!(coordinator.refresh("r1"), coordinator.refresh("r2"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_call_service() {
        let refresher = Arc::new(SlowRefresher {
            calls: AtomicUsize::new(0),
        });
        let coordinator = RefreshCoordinator::new(refresher.clone(), Arc::new(MemoryStore::new()));

        coordinator.refresh("r1").await.unwrap();
        coordinator.refresh("r1").await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_caller_still_stores_result() {
        let refresher = Arc::new(SlowRefresher {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let coordinator = RefreshCoordinator::new(refresher, store.clone());

        let abandoned = tokio::time::timeout(Duration::from_millis(5), coordinator.refresh("r1")).await;
        assert!(abandoned.is_err());
        assert_eq!(store.get(TokenKey::Access).unwrap(), None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.get(TokenKey::Access).unwrap().as_deref(), Some("new-for-r1"));
        assert_eq!(coordinator.in_flight(), 0);
    }
}
