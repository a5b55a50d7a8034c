//! Encrypted file-backed storage.
//!
//! Values are sealed with ChaCha20-Poly1305 under a key derived (HKDF-SHA256)
//! from a random master key kept next to the store. Each entry is
//! `base64(nonce || ciphertext)` and binds its storage key as associated
//! data, so an entry copied under another name fails to open.

use crate::{SecureStorage, StorageError, StorageResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

const KEY_INFO: &[u8] = b"authsession-token-store-v1";

type Entries = BTreeMap<String, String>;

/// File-backed [`SecureStorage`] with authenticated encryption.
pub struct EncryptedFileStorage {
    path: PathBuf,
    cipher: ChaCha20Poly1305,
    // Serializes read-modify-write cycles on the store file.
    lock: Mutex<()>,
}

impl EncryptedFileStorage {
    /// Open (or create) the store at `path`, using the master key at `key_path`.
    ///
    /// A new master key is generated the first time.
    pub fn open(path: impl Into<PathBuf>, key_path: &Path) -> StorageResult<Self> {
        let master = load_or_create_master_key(key_path)?;
        let key = derive_key(&master)?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;

        Ok(Self {
            path: path.into(),
            cipher,
            lock: Mutex::new(()),
        })
    }

    fn read_entries(&self) -> StorageResult<Entries> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Entries::new()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| StorageError::Encoding(format!("corrupt token store: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(&self, entries: &Entries) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written store.
        let tmp = self.path.with_extension("tmp");
        write_private(&tmp, content.as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn seal(&self, key: &str, value: &str) -> StorageResult<String> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value.as_bytes(),
                    aad: key.as_bytes(),
                },
            )
            .map_err(|e| StorageError::Crypto(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    fn open_entry(&self, key: &str, sealed: &str) -> StorageResult<String> {
        let bytes = BASE64
            .decode(sealed)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        if bytes.len() <= NONCE_SIZE {
            return Err(StorageError::Encoding(format!(
                "entry {key} is too short to contain a nonce"
            )));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Crypto(format!("failed to open entry {key}")))?;

        String::from_utf8(plaintext).map_err(|e| StorageError::Encoding(e.to_string()))
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), self.seal(key, value)?);
        self.write_entries(&entries)?;
        debug!(key, "Stored encrypted entry");
        Ok(())
    }

    /// All entries land in the same write-then-rename, so readers see
    /// either none or all of them.
    fn set_many(&self, pairs: &[(&str, &str)]) -> StorageResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;
        for (key, value) in pairs {
            entries.insert(key.to_string(), self.seal(key, value)?);
        }
        self.write_entries(&entries)?;
        debug!(count = pairs.len(), "Stored encrypted entries");
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock();
        let entries = self.read_entries()?;
        entries
            .get(key)
            .map(|sealed| self.open_entry(key, sealed))
            .transpose()
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.write_entries(&entries)?;
        debug!(key, "Deleted encrypted entry");
        Ok(true)
    }
}

fn load_or_create_master_key(key_path: &Path) -> StorageResult<[u8; KEY_SIZE]> {
    match std::fs::read_to_string(key_path) {
        Ok(encoded) => {
            let bytes = BASE64
                .decode(encoded.trim())
                .map_err(|e| StorageError::Encoding(format!("master key: {e}")))?;
            bytes.try_into().map_err(|bytes: Vec<u8>| {
                StorageError::Crypto(format!(
                    "Invalid master key size: expected {}, got {}",
                    KEY_SIZE,
                    bytes.len()
                ))
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut key = [0u8; KEY_SIZE];
            rand::thread_rng().fill_bytes(&mut key);
            if let Some(parent) = key_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            write_private(key_path, BASE64.encode(key).as_bytes())?;
            info!(path = %key_path.display(), "Generated token store master key");
            Ok(key)
        }
        Err(e) => Err(e.into()),
    }
}

fn derive_key(master: &[u8]) -> StorageResult<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, master);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(KEY_INFO, &mut okm)
        .map_err(|e| StorageError::Crypto(format!("HKDF expand failed: {e:?}")))?;
    Ok(okm)
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_in(dir: &Path) -> EncryptedFileStorage {
        EncryptedFileStorage::open(dir.join("tokens.json"), &dir.join("tokens.key")).unwrap()
    }

    #[test]
    fn test_set_get_delete() {
        let dir = tempdir().unwrap();
        let storage = open_in(dir.path());

        assert_eq!(storage.get("accessToken").unwrap(), None);
        storage.set("accessToken", "abc.def.ghi").unwrap();
        assert_eq!(
            storage.get("accessToken").unwrap().as_deref(),
            Some("abc.def.ghi")
        );

        assert!(storage.delete("accessToken").unwrap());
        assert!(!storage.delete("accessToken").unwrap());
        assert_eq!(storage.get("accessToken").unwrap(), None);
    }

    #[test]
    fn test_set_many_replaces_pair_in_one_write() {
        let dir = tempdir().unwrap();
        let storage = open_in(dir.path());
        storage.set("accessToken", "old-access").unwrap();
        storage.set("refreshToken", "old-refresh").unwrap();

        storage
            .set_many(&[("accessToken", "new-access"), ("refreshToken", "new-refresh")])
            .unwrap();

        let reopened = open_in(dir.path());
        assert_eq!(reopened.get("accessToken").unwrap().as_deref(), Some("new-access"));
        assert_eq!(reopened.get("refreshToken").unwrap().as_deref(), Some("new-refresh"));
        assert!(!dir.path().join("tokens.tmp").exists());
    }

    #[test]
    fn test_values_are_not_stored_in_plaintext() {
        let dir = tempdir().unwrap();
        let storage = open_in(dir.path());
        storage.set("refreshToken", "super-secret-refresh").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("tokens.json")).unwrap();
        assert!(raw.contains("refreshToken"));
        assert!(!raw.contains("super-secret-refresh"));
    }

    #[test]
    fn test_persists_across_instances() {
        let dir = tempdir().unwrap();
        open_in(dir.path()).set("accessToken", "one").unwrap();

        let reopened = open_in(dir.path());
        assert_eq!(reopened.get("accessToken").unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn test_other_master_key_cannot_read() {
        let dir = tempdir().unwrap();
        open_in(dir.path()).set("accessToken", "one").unwrap();

        std::fs::remove_file(dir.path().join("tokens.key")).unwrap();
        let rekeyed = open_in(dir.path());
        assert!(matches!(
            rekeyed.get("accessToken"),
            Err(StorageError::Crypto(_))
        ));
    }

    #[test]
    fn test_entry_bound_to_its_key() {
        let dir = tempdir().unwrap();
        let storage = open_in(dir.path());
        storage.set("accessToken", "one").unwrap();

        // Move the sealed access token under the refresh token name.
        let path = dir.path().join("tokens.json");
        let mut entries: Entries =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let sealed = entries.remove("accessToken").unwrap();
        entries.insert("refreshToken".to_string(), sealed);
        std::fs::write(&path, serde_json::to_string(&entries).unwrap()).unwrap();

        assert!(matches!(
            storage.get("refreshToken"),
            Err(StorageError::Crypto(_))
        ));
    }

    #[test]
    fn test_corrupt_store_is_encoding_error() {
        let dir = tempdir().unwrap();
        let storage = open_in(dir.path());
        std::fs::write(dir.path().join("tokens.json"), "{not json").unwrap();

        assert!(matches!(
            storage.get("accessToken"),
            Err(StorageError::Encoding(_))
        ));
    }

    #[test]
    fn test_invalid_master_key_size() {
        let dir = tempdir().unwrap();
        let key_path = dir.path().join("tokens.key");
        std::fs::write(&key_path, BASE64.encode([1u8; 8])).unwrap();

        let result = EncryptedFileStorage::open(dir.path().join("tokens.json"), &key_path);
        assert!(matches!(result, Err(StorageError::Crypto(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let _storage = open_in(dir.path());
        let mode = std::fs::metadata(dir.path().join("tokens.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
