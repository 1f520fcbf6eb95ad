//! Token ownership and refresh coordination
//!
//! The [`TokenRefreshCoordinator`] owns the access/refresh pair. Callers
//! never read or mutate tokens directly; they ask the coordinator for an
//! access token and it refreshes behind a single-flight gate when the pair
//! is expiring. The pair is persisted as two opaque strings in a
//! [`SecureStore`] so a session survives process restarts.

mod coordinator;
#[cfg(feature = "platform")]
mod keyring_store;

use std::collections::HashMap;

use async_trait::async_trait;
use caravel_domain::NetworkError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub use coordinator::TokenRefreshCoordinator;
#[cfg(feature = "platform")]
pub use keyring_store::KeyringSecureStore;

/// Secure-store key of the persisted access token
pub const ACCESS_TOKEN_KEY: &str = "caravel.auth.access";
/// Secure-store key of the persisted refresh token
pub const REFRESH_TOKEN_KEY: &str = "caravel.auth.refresh";

/// Authentication failures
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("not authenticated: no stored credentials")]
    NotAuthenticated,

    #[error("token refresh rejected: {0}")]
    RefreshFailed(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("secure store failure: {0}")]
    Store(String),
}

impl From<AuthError> for NetworkError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotAuthenticated => {
                NetworkError::Unauthorized("no stored credentials".to_string())
            }
            AuthError::RefreshFailed(reason) | AuthError::SessionExpired(reason) => {
                NetworkError::SessionExpired(reason)
            }
            AuthError::Store(reason) => NetworkError::Store(reason),
        }
    }
}

/// The access/refresh token pair.
///
/// Owned exclusively by the coordinator. `expires_at` is kept in memory
/// only; a pair loaded from storage has no expiry and counts as expiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into(), expires_at: None }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True when the pair expires within `threshold_seconds` of `now`, or
    /// when the expiry is unknown.
    pub fn is_expiring(&self, now: DateTime<Utc>, threshold_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(threshold_seconds) >= expires_at,
            None => true,
        }
    }
}

/// Lifecycle of the coordinator's token pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// No credentials stored
    NotAuthenticated,
    /// Pair usable as-is
    Valid,
    /// Pair close to expiry; the next caller triggers a refresh
    Expiring,
    /// A refresh is in flight; callers wait on its outcome
    Refreshing,
    /// The last refresh was rejected; the session must be re-established
    Failed,
}

/// Secure credential storage (system keychain or equivalent)
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn save(&self, key: &str, value: &str) -> Result<(), AuthError>;
    async fn load(&self, key: &str) -> Result<Option<String>, AuthError>;
    async fn delete(&self, key: &str) -> Result<(), AuthError>;
}

/// Exchanges a refresh token for a new pair.
///
/// Implementations talk to the identity provider; this crate only defines
/// the seam.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;
}

/// Hands out a bearer token for outbound calls
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Current access token, refreshing first if the pair is expiring.
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Forces a refresh regardless of apparent validity. Used after the
    /// server rejects a token the coordinator still considered fresh.
    async fn force_refresh(&self) -> Result<String, AuthError>;
}

/// In-memory secure store for development and tests
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn save(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.values.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), AuthError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}
