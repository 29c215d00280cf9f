//! Local Cache
//!
//! Single-slot, device-local, durable storage for the last known device token.
//! Failures are logged and swallowed: the remote registry is the source of truth.

use crate::error::{CacheOperation, ErrorChannel, LifecycleError};
use classpush_common::TokenValue;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by a [`KeyValueStore`].
#[derive(Error, Debug)]
pub enum LocalStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt store contents: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Device-local key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError>;
    fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let entries = self.entries.lock().map_err(|_| LocalStoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let mut entries = self.entries.lock().map_err(|_| LocalStoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let mut entries = self.entries.lock().map_err(|_| LocalStoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten atomically (temp file + rename) on every change.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, LocalStoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current contents for a rewrite. A corrupt file is replaced, not kept.
    fn read_for_update(&self) -> Result<BTreeMap<String, String>, LocalStoreError> {
        match self.read_all() {
            Err(LocalStoreError::Corrupt(e)) => {
                warn!(path = %self.path.display(), "[push] Discarding corrupt local store: {}", e);
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), LocalStoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let _guard = self.lock.lock().map_err(|_| LocalStoreError::Poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let _guard = self.lock.lock().map_err(|_| LocalStoreError::Poisoned)?;
        let mut entries = self.read_for_update()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let _guard = self.lock.lock().map_err(|_| LocalStoreError::Poisoned)?;
        match self.read_all() {
            Ok(mut entries) => {
                if entries.remove(key).is_some() {
                    self.write_all(&entries)?;
                }
                Ok(())
            }
            Err(LocalStoreError::Corrupt(e)) => {
                warn!(path = %self.path.display(), "[push] Discarding corrupt local store: {}", e);
                self.write_all(&BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }
}

/// The device token slot used by the coordinator.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
    errors: ErrorChannel,
}

impl LocalCache {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, errors: ErrorChannel) -> Self {
        Self {
            store,
            key: key.into(),
            errors,
        }
    }

    /// The cached token. Unreadable storage reads as empty.
    pub fn get(&self) -> Option<TokenValue> {
        match self.store.get(&self.key) {
            Ok(value) => value.and_then(TokenValue::new),
            Err(e) => {
                warn!("[push] Could not read local token cache: {}", e);
                None
            }
        }
    }

    pub fn set(&self, token: &TokenValue) {
        match self.store.set(&self.key, token.as_str()) {
            Ok(()) => debug!(token = %token.fingerprint(), "[push] Token stored locally"),
            Err(source) => self.errors.report(LifecycleError::LocalStorageFailure {
                operation: CacheOperation::Set,
                source,
            }),
        }
    }

    pub fn clear(&self) {
        match self.store.remove(&self.key) {
            Ok(()) => debug!("[push] Local token cleared"),
            Err(source) => self.errors.report(LifecycleError::LocalStorageFailure {
                operation: CacheOperation::Clear,
                source,
            }),
        }
    }
}
