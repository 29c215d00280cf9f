//! Factory for wiring a coordinator from configuration
//!
//! This module selects the registry and local cache backends named in
//! [`AppConfig`] and hands them, together with the host platform, to a new
//! [`TokenLifecycleCoordinator`].

use crate::auth::{AccessTokenSource, ServiceAccountTokenSource, StaticAccessToken};
use crate::client::{FirebaseError, FirestoreTokenStore, FIRESTORE_BASE_URL};
use crate::coordinator::{CoordinatorSettings, TokenLifecycleCoordinator};
use crate::error::ErrorChannel;
use crate::local_cache::{FileKeyValueStore, KeyValueStore, LocalCache, MemoryKeyValueStore};
use crate::memory_store::MemoryTokenStore;
use crate::platform::PushPlatform;
use crate::registry::RemoteRegistry;
use classpush_common::{log_result, DeviceDescriptor, TokenStore};
use classpush_config::models::{AppConfig, RegistryBackend};
use std::sync::Arc;
use tracing::info;

#[cfg(feature = "database")]
use classpush_common::StoreError;
#[cfg(feature = "database")]
use classpush_db::{DbClient, SqlTokenStore};

const DEFAULT_DATABASE_ID: &str = "(default)";
/// Bearer token the Firestore emulator accepts.
const EMULATOR_TOKEN: &str = "owner";

/// Builds coordinators and their collaborators from configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorFactory {
    device: DeviceDescriptor,
}

impl CoordinatorFactory {
    pub fn new() -> Self {
        Self {
            device: DeviceDescriptor::detect(),
        }
    }

    /// Use `device` instead of the detected descriptor for every record written.
    pub fn with_device(device: DeviceDescriptor) -> Self {
        Self { device }
    }

    /// Create a coordinator for `platform` as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured registry backend cannot be set up.
    /// A missing public key is not an error here; it surfaces as
    /// `Failed(Configuration)` on the first acquisition.
    pub async fn build(
        &self,
        config: &AppConfig,
        platform: Arc<dyn PushPlatform>,
        errors: ErrorChannel,
    ) -> Result<Arc<TokenLifecycleCoordinator>, FirebaseError> {
        let store = self.build_store(config).await?;
        let registry = RemoteRegistry::new(store, errors.clone());
        let cache = self.build_cache(config, errors.clone());

        let settings = CoordinatorSettings {
            remove_on_sign_out: config.lifecycle.remove_on_sign_out,
            device: self.device.clone(),
        };

        Ok(TokenLifecycleCoordinator::new(
            platform,
            config.messaging.vapid_key.clone(),
            cache,
            registry,
            settings,
            errors,
        )
        .await)
    }

    /// The local cache: file-backed when `local_cache.path` is set, in-memory otherwise.
    pub fn build_cache(&self, config: &AppConfig, errors: ErrorChannel) -> LocalCache {
        let store: Arc<dyn KeyValueStore> = match &config.local_cache.path {
            Some(path) if !path.is_empty() => {
                info!("Using file-backed local token cache at {}", path);
                Arc::new(FileKeyValueStore::new(path))
            }
            _ => {
                info!("Using in-memory local token cache");
                Arc::new(MemoryKeyValueStore::new())
            }
        };
        LocalCache::new(store, config.local_cache.key.clone(), errors)
    }

    /// The remote registry store named by `registry.backend`.
    pub async fn build_store(&self, config: &AppConfig) -> Result<Arc<dyn TokenStore>, FirebaseError> {
        match config.registry.backend {
            RegistryBackend::Memory => {
                info!("Using in-memory token registry");
                Ok(Arc::new(MemoryTokenStore::new()))
            }
            RegistryBackend::Firestore => {
                let store = log_result(
                    Self::firestore_store(config),
                    "Using Firestore token registry",
                    "Could not set up Firestore token registry",
                )?;
                Ok(Arc::new(store))
            }
            RegistryBackend::Sqlite => log_result(
                Self::sqlite_store(config).await,
                "Using SQLite token registry",
                "Could not set up SQLite token registry",
            ),
        }
    }

    fn firestore_store(config: &AppConfig) -> Result<FirestoreTokenStore, FirebaseError> {
        let firestore = config.registry.firestore.as_ref().ok_or_else(|| {
            FirebaseError::ConfigError("Missing [registry.firestore] section".to_string())
        })?;
        let project_id = firestore.project_id.as_deref().ok_or_else(|| {
            FirebaseError::ConfigError("Missing project_id in Firestore config".to_string())
        })?;

        let auth: Arc<dyn AccessTokenSource> = match (&firestore.key_path, &firestore.base_url) {
            (Some(key_path), _) => Arc::new(ServiceAccountTokenSource::new(key_path.clone())),
            // A custom endpoint without credentials is the emulator
            (None, Some(_)) => Arc::new(StaticAccessToken(EMULATOR_TOKEN.to_string())),
            (None, None) => {
                return Err(FirebaseError::ConfigError(
                    "Missing key_path in Firestore config".to_string(),
                ))
            }
        };

        FirestoreTokenStore::new(
            firestore.base_url.as_deref().unwrap_or(FIRESTORE_BASE_URL),
            project_id,
            firestore
                .database_id
                .as_deref()
                .unwrap_or(DEFAULT_DATABASE_ID),
            auth,
            config.registry.poll_interval(),
        )
    }

    #[cfg(feature = "database")]
    async fn sqlite_store(config: &AppConfig) -> Result<Arc<dyn TokenStore>, FirebaseError> {
        let client = DbClient::new(config).await.map_err(StoreError::from)?;
        let store = SqlTokenStore::new(client, config.registry.poll_interval());
        store.init_schema().await.map_err(StoreError::from)?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "database"))]
    async fn sqlite_store(_config: &AppConfig) -> Result<Arc<dyn TokenStore>, FirebaseError> {
        Err(FirebaseError::ConfigError(
            "sqlite registry backend requires the `database` feature".to_string(),
        ))
    }
}

impl Default for CoordinatorFactory {
    fn default() -> Self {
        Self::new()
    }
}
