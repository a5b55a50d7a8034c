//! CLI command implementations.

mod auth;
mod fetch;

pub use auth::{login, logout, refresh, status};
pub use fetch::fetch;

use anyhow::Result;
use auth_config::{Config, Paths, Platform};
use auth_session::{ReqwestClient, SessionManager};
use auth_storage::{EncryptedFileStorage, NoopStorage, SecureStorage};
use std::sync::Arc;

/// Build the session for the configured platform.
///
/// Native sessions keep tokens in the encrypted store under the data
/// directory. Web sessions hold credentials only in the client's cookie
/// jar, so they last for a single invocation.
pub fn build_session(paths: &Paths, config: &Config) -> Result<SessionManager> {
    let (http, storage): (ReqwestClient, Arc<dyn SecureStorage>) = match config.platform {
        Platform::Native => {
            paths.ensure_dirs()?;
            let storage =
                EncryptedFileStorage::open(paths.token_store_file(), &paths.token_key_file())?;
            (
                ReqwestClient::new(config.request_timeout(), false)?,
                Arc::new(storage),
            )
        }
        Platform::Web => (
            ReqwestClient::new(config.request_timeout(), true)?,
            Arc::new(NoopStorage),
        ),
    };

    Ok(SessionManager::new(config, Arc::new(http), storage)?)
}
