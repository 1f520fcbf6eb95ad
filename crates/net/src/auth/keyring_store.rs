//! System keychain adapter for token persistence

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::{AuthError, SecureStore};

/// Default keychain service name
pub const DEFAULT_SERVICE: &str = "com.caravel.client";

/// [`SecureStore`] backed by the operating system keychain.
///
/// Each storage key maps to one keychain entry under the configured
/// service name.
#[derive(Debug, Clone)]
pub struct KeyringSecureStore {
    service: String,
}

impl KeyringSecureStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn entry(&self, key: &str) -> Result<Entry, AuthError> {
        Entry::new(&self.service, key).map_err(|e| AuthError::Store(e.to_string()))
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn save(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entry(key)?.set_password(value).map_err(|e| AuthError::Store(e.to_string()))?;
        debug!(key, "credential stored in keychain");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, AuthError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Store(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AuthError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Store(e.to_string())),
        }
    }
}
