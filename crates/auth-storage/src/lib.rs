//! Secure token storage for the session core.
//!
//! Backends:
//! - [`EncryptedFileStorage`]: ChaCha20-Poly1305 sealed entries on disk (native)
//! - [`NoopStorage`]: stores nothing; the browser's cookie jar owns credentials (web)
//! - [`MemoryStorage`]: in-process map for tests and ephemeral sessions

mod file;
mod keys;
mod memory;
mod noop;
mod traits;

pub use file::EncryptedFileStorage;
pub use keys::TokenKeys;
pub use memory::MemoryStorage;
pub use noop::NoopStorage;
pub use traits::SecureStorage;

use thiserror::Error;

/// Error type for storage operations.
///
/// A missing key is never an error; `get` returns `None` and `delete`
/// returns `false`.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific failure
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Encryption, decryption or key derivation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
