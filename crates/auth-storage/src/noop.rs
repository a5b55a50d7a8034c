//! Storage that keeps nothing.

use crate::{SecureStorage, StorageResult};
use tracing::trace;

/// Used on web, where credentials live in HTTP-only cookies that script
/// code cannot read. Writes are dropped and reads always miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

impl SecureStorage for NoopStorage {
    fn set(&self, key: &str, _value: &str) -> StorageResult<()> {
        trace!(key, "Ignoring write to no-op storage");
        Ok(())
    }

    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    fn delete(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }
}
