//! Storage adapters: named string slots with `localStorage`-style semantics.
//!
//! `MemoryStorage` is a shareable in-process map, handy in tests and for
//! session-scoped stores. `FileStorage` keeps one file per key inside a
//! directory and is the default provider.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StorageError;

/// Environment variable overriding the default `FileStorage` directory.
pub const STORAGE_DIR_ENV: &str = "DEEPSTORE_DIR";

/// Slot-oriented key/value storage owned by the caller.
///
/// Methods take `&self`; implementations provide their own interior
/// mutability so a single adapter can be shared between stores.
pub trait StorageAdapter: Send + Sync {
    /// Read a slot, `None` when it was never written.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Create or overwrite a slot.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a slot. Removing a missing slot is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Name of the `index`-th slot in a stable order.
    fn key(&self, index: usize) -> Result<Option<String>, StorageError>;

    /// Remove every slot.
    fn clear(&self) -> Result<(), StorageError>;

    /// Number of slots.
    fn len(&self) -> Result<usize, StorageError>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// Factory handing out the adapter a store should persist through.
pub type StorageProvider = Arc<dyn Fn() -> Arc<dyn StorageAdapter> + Send + Sync>;

/// Wrap an existing adapter as a provider.
pub fn provider_for(storage: Arc<dyn StorageAdapter>) -> StorageProvider {
    Arc::new(move || storage.clone())
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-process storage. Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: Arc<Mutex<BTreeMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            slots: Arc::new(Mutex::new(BTreeMap::new())),
            quota_bytes: None,
        }
    }

    /// Storage that refuses writes once keys plus values exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        MemoryStorage {
            slots: Arc::new(Mutex::new(BTreeMap::new())),
            quota_bytes: Some(bytes),
        }
    }
}

impl StorageAdapter for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock();
        if let Some(quota) = self.quota_bytes {
            let used: usize = slots
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded(format!(
                    "writing {} bytes to '{}' exceeds {} byte quota",
                    value.len(),
                    key,
                    quota
                )));
            }
        }
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.slots.lock().remove(key);
        Ok(())
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        Ok(self.slots.lock().keys().nth(index).cloned())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.slots.lock().clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.slots.lock().len())
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

const SLOT_EXTENSION: &str = "slot";

/// One file per slot under a directory.
///
/// Key characters outside `[A-Za-z0-9_-]` are escaped as `%XX` so any key
/// maps to a valid file name and back.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(FileStorage { dir })
    }

    /// `$DEEPSTORE_DIR`, or `deepstore/` under the system temp directory.
    pub fn default_dir() -> PathBuf {
        match std::env::var_os(STORAGE_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir().join("deepstore"),
        }
    }

    /// Storage rooted at [`FileStorage::default_dir`].
    pub fn default_location() -> Result<Self, StorageError> {
        Self::new(Self::default_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), SLOT_EXTENSION))
    }

    fn io_err(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn sorted_keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Self::io_err(&self.dir, e))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_err(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SLOT_EXTENSION) {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()).and_then(decode_key) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl StorageAdapter for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.slot_path(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.slot_path(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value).map_err(|e| Self::io_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::io_err(&path, e))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.slot_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
        Ok(self.sorted_keys()?.into_iter().nth(index))
    }

    fn clear(&self) -> Result<(), StorageError> {
        for key in self.sorted_keys()? {
            self.remove_item(&key)?;
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.sorted_keys()?.len())
    }
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
