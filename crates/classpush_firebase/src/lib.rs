//! Firebase Cloud Messaging device-token lifecycle for classpush
//!
//! This crate keeps a device's push token registered for the signed-in user:
//! it asks for notification permission, mints a token from the push service,
//! records it in a per-user remote registry and a device-local cache, watches
//! the registry for the record's removal and refreshes the token when needed.
//!
//! # Features
//!
//! - Permission prompting at most once per session
//! - Token reuse from a local cache with self-healing registry upserts
//! - Existence watch that refreshes the token when its record disappears
//! - Registry backends: in-memory, Cloud Firestore (REST) and SQLite (with the `database` feature)
//! - Parsing of foreground message payloads for in-app toasts
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! classpush-firebase = { version = "0.1.0" }
//! ```
//!
//! To use the SQLite registry:
//!
//! ```toml
//! [dependencies]
//! classpush-firebase = { version = "0.1.0", features = ["database"] }
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use classpush_config::load_config;
//! use classpush_firebase::{CoordinatorFactory, ErrorChannel, PushPlatform};
//! use std::sync::Arc;
//!
//! async fn on_login(platform: Arc<dyn PushPlatform>, user_id: &str) {
//!     let config = load_config().expect("configuration");
//!     let coordinator = CoordinatorFactory::new()
//!         .build(&config, platform, ErrorChannel::log_only())
//!         .await
//!         .expect("registry backend");
//!     coordinator.on_sign_in(user_id).await;
//! }
//! ```

pub mod auth;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod local_cache;
pub mod memory_store;
pub mod messages;
pub mod permission;
pub mod platform;
pub mod registry;
pub mod token_source;

// Re-export the coordinator and its vocabulary
pub use coordinator::{
    CoordinatorSettings, FailureReason, LifecycleState, TokenLifecycleCoordinator, TriggerOutcome,
};
// Re-export the factory
pub use factory::CoordinatorFactory;
pub use error::{ErrorChannel, LifecycleError};
pub use platform::{PermissionState, PlatformCapabilities, PlatformError, PushPlatform};
pub use client::{FirebaseError, FirestoreTokenStore};
pub use local_cache::{FileKeyValueStore, KeyValueStore, LocalCache, MemoryKeyValueStore};
pub use memory_store::MemoryTokenStore;
pub use messages::{ForegroundMessage, MessageKind};
pub use registry::{RemoteRegistry, WatchHandle, WatchPriming};
