use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use common::errors::AuthError;
use common::models::Broker;
use storage::tokens::{BrokerToken, TokenStore};

/// Time left on a token below which we refresh anyway (15 minutes).
const SAFETY_MARGIN_S: i64 = 15 * 60;
/// Maximum session age before a forced refresh (75 minutes).
const MAX_TOKEN_AGE_S: i64 = 75 * 60;

/// A venue's login flow: exchange long-lived credentials for a session
/// token and its expiry.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<(String, DateTime<Utc>), AuthError>;
}

/// Single-flighted token cache in front of a venue's auth endpoint.
///
/// Reads take the shared lock and reuse the cached token while it is
/// usable. A refresh takes the exclusive lock and re-checks before calling
/// out, so concurrent callers that raced to the slow path wait for one
/// login instead of issuing colliding refreshes. Fresh tokens are written
/// through to durable storage and picked up by other processes from there.
pub struct TokenManager {
    broker: Broker,
    source: Arc<dyn TokenSource>,
    store: TokenStore,
    cached: RwLock<Option<BrokerToken>>,
    safety_margin_s: i64,
    max_age_s: i64,
}

impl TokenManager {
    pub fn new(broker: Broker, source: Arc<dyn TokenSource>, store: TokenStore) -> Self {
        Self {
            broker,
            source,
            store,
            cached: RwLock::new(None),
            safety_margin_s: SAFETY_MARGIN_S,
            max_age_s: MAX_TOKEN_AGE_S,
        }
    }

    pub fn with_thresholds(mut self, safety_margin_s: i64, max_age_s: i64) -> Self {
        self.safety_margin_s = safety_margin_s;
        self.max_age_s = max_age_s;
        self
    }

    pub async fn get_valid_token(&self) -> Result<String, AuthError> {
        let now = Utc::now();

        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref()
                && token.usable(now, self.safety_margin_s, self.max_age_s)
            {
                return Ok(token.access_token.clone());
            }
        }

        let mut cached = self.cached.write().await;

        // Someone else may have refreshed while we waited for the lock.
        if let Some(token) = cached.as_ref()
            && token.usable(now, self.safety_margin_s, self.max_age_s)
        {
            return Ok(token.access_token.clone());
        }

        // A sibling process may hold a live session in the durable store.
        match self.store.get(self.broker).await {
            Ok(Some(token)) if token.usable(now, self.safety_margin_s, self.max_age_s) => {
                let access = token.access_token.clone();
                *cached = Some(token);
                return Ok(access);
            }
            Ok(_) => {}
            Err(e) => warn!("Token store read failed for {}: {}", self.broker, e),
        }

        info!("Refreshing {} session token", self.broker);
        let (access_token, expires_at) = self.source.fetch().await?;
        let token = BrokerToken {
            broker: self.broker,
            access_token: access_token.clone(),
            expires_at,
            created_at: now,
        };
        if let Err(e) = self.store.put(&token).await {
            // The token is still good for this invocation even if the
            // write-through failed.
            warn!("Token store write failed for {}: {}", self.broker, e);
        }
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached and persisted token. Called when the venue answers
    /// 401 with a token we believed valid.
    pub async fn invalidate(&self) {
        warn!("Invalidating {} session token", self.broker);
        *self.cached.write().await = None;
        if let Err(e) = self.store.delete(self.broker).await {
            warn!("Token store delete failed for {}: {}", self.broker, e);
        }
    }

    /// Token validity for the status endpoint; never triggers a refresh.
    pub async fn current_validity(&self) -> Option<(DateTime<Utc>, bool)> {
        let now = Utc::now();
        let cached = self.cached.read().await;
        let token = match cached.as_ref() {
            Some(t) => Some(t.clone()),
            None => self.store.get(self.broker).await.ok().flatten(),
        };
        token.map(|t| {
            let usable = t.usable(now, self.safety_margin_s, self.max_age_s);
            (t.expires_at, usable)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self) -> Result<(String, DateTime<Utc>), AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            // A short pause widens the race window for the single-flight
            // assertion below.
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok((format!("token-{n}"), Utc::now() + Duration::minutes(80)))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TokenSource for FailingSource {
        async fn fetch(&self) -> Result<(String, DateTime<Utc>), AuthError> {
            Err(AuthError::new(Broker::Tradovate, "login rejected"))
        }
    }

    async fn manager(source: Arc<dyn TokenSource>) -> TokenManager {
        let pool = storage::db::connect_ephemeral().await.unwrap();
        TokenManager::new(Broker::Tradovate, source, TokenStore::new(pool))
    }

    #[tokio::test]
    async fn caches_until_unusable() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let mgr = manager(source.clone()).await;

        let first = mgr.get_valid_token().await.unwrap();
        let second = mgr.get_valid_token().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let mgr = Arc::new(manager(source.clone()).await);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move { mgr.get_valid_token().await }));
        }
        let mut tokens = Vec::new();
        for h in handles {
            tokens.push(h.await.unwrap().unwrap());
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn invalidate_forces_new_login() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let mgr = manager(source.clone()).await;

        let first = mgr.get_valid_token().await.unwrap();
        mgr.invalidate().await;
        let second = mgr.get_valid_token().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_auth_error() {
        let mgr = manager(Arc::new(FailingSource)).await;
        let err = mgr.get_valid_token().await.unwrap_err();
        assert_eq!(err.broker, Broker::Tradovate);
    }

    #[tokio::test]
    async fn persisted_token_survives_a_new_manager() {
        let pool = storage::db::connect_ephemeral().await.unwrap();
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let first = TokenManager::new(
            Broker::Tradovate,
            source.clone(),
            TokenStore::new(pool.clone()),
        );
        let token = first.get_valid_token().await.unwrap();

        // Fresh manager over the same durable store: no second login.
        let second = TokenManager::new(Broker::Tradovate, source.clone(), TokenStore::new(pool));
        assert_eq!(second.get_valid_token().await.unwrap(), token);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
