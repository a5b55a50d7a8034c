//! Storage trait definitions.

use crate::StorageResult;

/// Trait for secure storage backends
pub trait SecureStorage: Send + Sync {
    /// Store a value securely, replacing any previous value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Store several values as one update.
    ///
    /// Backends that can persist all entries in a single write override
    /// this; the default stores them one at a time.
    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether a value was present.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
