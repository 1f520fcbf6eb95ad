//! Single-flight token refresh

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{
    AccessTokenProvider, AuthError, RefreshState, SecureStore, TokenPair, TokenRefresher,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
use crate::time::{Clock, SystemClock};

/// Owns the token pair and guarantees at most one in-flight refresh.
///
/// Callers racing on an expiring pair serialize on an async gate: the first
/// one performs the network refresh, the rest adopt its outcome. The gate
/// is fair, so waiters resume in the order they began waiting. A rejected
/// refresh leaves the coordinator in [`RefreshState::Failed`] until new
/// tokens are stored or the session is cleared.
pub struct TokenRefreshCoordinator<R, S, C = SystemClock>
where
    R: TokenRefresher,
    S: SecureStore,
    C: Clock,
{
    refresher: Arc<R>,
    store: Arc<S>,
    clock: C,
    refresh_threshold_seconds: i64,
    tokens: RwLock<Option<TokenPair>>,
    failure: RwLock<Option<String>>,
    refresh_gate: Mutex<()>,
    refresh_epoch: AtomicU64,
    last_outcome: RwLock<Option<Result<String, AuthError>>>,
    refreshing: AtomicBool,
}

impl<R, S> TokenRefreshCoordinator<R, S, SystemClock>
where
    R: TokenRefresher,
    S: SecureStore,
{
    pub fn new(refresher: Arc<R>, store: Arc<S>) -> Self {
        Self::with_clock(refresher, store, SystemClock)
    }
}

impl<R, S, C> TokenRefreshCoordinator<R, S, C>
where
    R: TokenRefresher,
    S: SecureStore,
    C: Clock,
{
    pub fn with_clock(refresher: Arc<R>, store: Arc<S>, clock: C) -> Self {
        Self {
            refresher,
            store,
            clock,
            refresh_threshold_seconds: 300,
            tokens: RwLock::new(None),
            failure: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
            last_outcome: RwLock::new(None),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Seconds before expiry at which the pair counts as expiring.
    pub fn with_refresh_threshold(mut self, seconds: i64) -> Self {
        self.refresh_threshold_seconds = seconds;
        self
    }

    /// Loads any persisted pair from the secure store.
    ///
    /// Expiry is not persisted, so a restored pair counts as expiring and
    /// the first caller triggers a refresh.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        let access = self.store.load(ACCESS_TOKEN_KEY).await?;
        let refresh = self.store.load(REFRESH_TOKEN_KEY).await?;

        if let (Some(access), Some(refresh)) = (access, refresh) {
            *self.tokens.write().await = Some(TokenPair::new(access, refresh));
            info!("restored persisted session");
        }
        Ok(())
    }

    /// Adopts a freshly issued pair (e.g. after interactive login) and
    /// persists it. Clears any previous failure.
    pub async fn store_tokens(&self, pair: TokenPair) -> Result<(), AuthError> {
        self.store.save(ACCESS_TOKEN_KEY, &pair.access_token).await?;
        self.store.save(REFRESH_TOKEN_KEY, &pair.refresh_token).await?;
        *self.tokens.write().await = Some(pair);
        *self.failure.write().await = None;
        Ok(())
    }

    /// Forgets the pair in memory and in the secure store.
    pub async fn clear_tokens(&self) -> Result<(), AuthError> {
        self.store.delete(ACCESS_TOKEN_KEY).await?;
        self.store.delete(REFRESH_TOKEN_KEY).await?;
        *self.tokens.write().await = None;
        *self.failure.write().await = None;
        Ok(())
    }

    /// Current lifecycle state of the pair.
    pub async fn state(&self) -> RefreshState {
        if self.refreshing.load(Ordering::SeqCst) {
            return RefreshState::Refreshing;
        }
        if self.failure.read().await.is_some() {
            return RefreshState::Failed;
        }
        match self.tokens.read().await.as_ref() {
            None => RefreshState::NotAuthenticated,
            Some(pair) => {
                if pair.is_expiring(self.wall_now(), self.refresh_threshold_seconds) {
                    RefreshState::Expiring
                } else {
                    RefreshState::Valid
                }
            }
        }
    }

    /// Returns a usable access token, refreshing first when the pair is
    /// expiring.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        if let Some(reason) = self.failure.read().await.clone() {
            return Err(AuthError::SessionExpired(reason));
        }

        {
            let tokens = self.tokens.read().await;
            match tokens.as_ref() {
                None => return Err(AuthError::NotAuthenticated),
                Some(pair) => {
                    if !pair.is_expiring(self.wall_now(), self.refresh_threshold_seconds) {
                        return Ok(pair.access_token.clone());
                    }
                }
            }
        }

        self.refresh_shared(false).await
    }

    /// Refreshes regardless of apparent validity. Used after a server-side
    /// rejection of a token the coordinator still considered fresh.
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        if let Some(reason) = self.failure.read().await.clone() {
            return Err(AuthError::SessionExpired(reason));
        }
        if self.tokens.read().await.is_none() {
            return Err(AuthError::NotAuthenticated);
        }
        self.refresh_shared(true).await
    }

    fn wall_now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.clock.system_time())
    }

    async fn refresh_shared(&self, force: bool) -> Result<String, AuthError> {
        let observed = self.refresh_epoch.load(Ordering::Acquire);
        let _guard = self.refresh_gate.lock().await;

        // A refresh finished while we waited for the gate; share its outcome
        // instead of issuing another network call.
        if self.refresh_epoch.load(Ordering::Acquire) != observed {
            if let Some(outcome) = self.last_outcome.read().await.clone() {
                return outcome;
            }
        }

        if !force {
            if let Some(pair) = self.tokens.read().await.as_ref() {
                if !pair.is_expiring(self.wall_now(), self.refresh_threshold_seconds) {
                    return Ok(pair.access_token.clone());
                }
            }
        }

        let refresh_token = match self.tokens.read().await.as_ref() {
            Some(pair) => pair.refresh_token.clone(),
            None => return Err(AuthError::NotAuthenticated),
        };

        self.refreshing.store(true, Ordering::SeqCst);
        debug!("refreshing access token");
        let result = self.refresher.refresh(&refresh_token).await;
        self.refreshing.store(false, Ordering::SeqCst);

        let outcome = match result {
            Ok(pair) => {
                if let Err(e) = self.persist_pair(&pair).await {
                    warn!(error = %e, "refreshed tokens held in memory only");
                }
                let access = pair.access_token.clone();
                *self.tokens.write().await = Some(pair);
                *self.failure.write().await = None;
                info!("access token refreshed");
                Ok(access)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "token refresh failed; session marked expired");
                *self.failure.write().await = Some(reason.clone());
                Err(AuthError::SessionExpired(reason))
            }
        };

        *self.last_outcome.write().await = Some(outcome.clone());
        self.refresh_epoch.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn persist_pair(&self, pair: &TokenPair) -> Result<(), AuthError> {
        self.store.save(ACCESS_TOKEN_KEY, &pair.access_token).await?;
        self.store.save(REFRESH_TOKEN_KEY, &pair.refresh_token).await?;
        Ok(())
    }
}

#[async_trait]
impl<R, S, C> AccessTokenProvider for TokenRefreshCoordinator<R, S, C>
where
    R: TokenRefresher,
    S: SecureStore,
    C: Clock,
{
    async fn access_token(&self) -> Result<String, AuthError> {
        TokenRefreshCoordinator::access_token(self).await
    }

    async fn force_refresh(&self) -> Result<String, AuthError> {
        TokenRefreshCoordinator::force_refresh(self).await
    }
}
