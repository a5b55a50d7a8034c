//! Token persistence on top of [`SecureStorage`].

use auth_storage::{SecureStorage, StorageResult, TokenKeys};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// An access/refresh token pair issued together by the broker.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "crate::claims::unix_now")]
    pub issued_at: i64,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            issued_at: crate::claims::unix_now(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Named token storage. The single source of truth for native credentials.
///
/// Tokens are read from storage on every use and never cached here, so a
/// value read after a refresh is always the refreshed one.
#[derive(Clone)]
pub struct SecureTokenStore {
    storage: Arc<dyn SecureStorage>,
    keys: TokenKeys,
}

impl SecureTokenStore {
    pub fn new(storage: Arc<dyn SecureStorage>, keys: TokenKeys) -> Self {
        Self { storage, keys }
    }

    pub fn keys(&self) -> &TokenKeys {
        &self.keys
    }

    pub fn get_token(&self, name: &str) -> StorageResult<Option<String>> {
        self.storage.get(name)
    }

    pub fn save_token(&self, name: &str, value: &str) -> StorageResult<()> {
        self.storage.set(name, value)
    }

    /// Remove a token. Deleting a missing token is not an error.
    pub fn delete_token(&self, name: &str) -> StorageResult<()> {
        let existed = self.storage.delete(name)?;
        debug!(key = name, existed, "Deleted token");
        Ok(())
    }

    /// Stored access token; storage failures read as "no token".
    pub fn access_token(&self) -> Option<String> {
        self.read_fail_closed(&self.keys.access)
    }

    /// Stored refresh token; storage failures read as "no token".
    pub fn refresh_token(&self) -> Option<String> {
        self.read_fail_closed(&self.keys.refresh)
    }

    /// Persist both halves of a freshly issued pair in one storage update.
    pub fn save_pair(&self, pair: &TokenPair) -> StorageResult<()> {
        self.storage.set_many(&[
            (self.keys.access.as_str(), pair.access_token.as_str()),
            (self.keys.refresh.as_str(), pair.refresh_token.as_str()),
        ])
    }

    /// Delete both tokens. Both deletions are attempted; the first error wins.
    pub fn clear(&self) -> StorageResult<()> {
        let access = self.delete_token(&self.keys.access);
        let refresh = self.delete_token(&self.keys.refresh);
        access.and(refresh)
    }

    fn read_fail_closed(&self, name: &str) -> Option<String> {
        match self.storage.get(name) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key = name, error = %e, "Token read failed, treating as absent");
                None
            }
        }
    }
}
