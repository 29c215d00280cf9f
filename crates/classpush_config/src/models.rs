// --- File: crates/classpush_config/src/models.rs ---

use serde::{Deserialize, Serialize};
use std::time::Duration;

// --- Push messaging Config ---
// Holds the public key handed to the push service when minting a device token.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MessagingConfig {
    pub vapid_key: Option<String>, // Usually "secret_from_env" -> MESSAGING_VAPID_KEY
}

// --- Local Cache Config ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LocalCacheConfig {
    /// File backing the cache. No path means an in-memory cache.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_cache_key")]
    pub key: String,
}

fn default_cache_key() -> String {
    "fcm_token".to_string()
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            key: default_cache_key(),
        }
    }
}

// --- Remote Registry Config ---
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Memory,
    Firestore,
    Sqlite,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FirestoreConfig {
    pub project_id: Option<String>,
    pub key_path: Option<String>, // Service account JSON
    #[serde(default)]
    pub database_id: Option<String>, // Defaults to "(default)"
    #[serde(default)]
    pub base_url: Option<String>, // Defaults to https://firestore.googleapis.com/v1
}

// --- Database Config ---
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String, // e.g. sqlite://classpush.db?mode=rwc
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    /// How often polling backends are re-read by existence watchers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub firestore: Option<FirestoreConfig>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

impl RegistryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::default(),
            poll_interval_ms: default_poll_interval_ms(),
            firestore: None,
            database: None,
        }
    }
}

// --- Lifecycle policy ---
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LifecycleConfig {
    /// Delete this device's remote record when the user signs out.
    /// Off by default: the record stays until the next acquisition replaces it.
    #[serde(default)]
    pub remove_on_sign_out: bool,
}

// --- Unified App Configuration ---
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub local_cache: LocalCacheConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}
