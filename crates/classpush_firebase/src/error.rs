//! Lifecycle error taxonomy and the out-of-band error channel.
//!
//! None of these errors are returned from the coordinator's trigger methods.
//! They are logged and, when a receiver is attached, forwarded so the host can
//! surface diagnostics without interrupting sign-in or sign-out.

use crate::local_cache::LocalStoreError;
use classpush_common::StoreError;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Remote registry operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryOperation {
    Upsert,
    Remove,
}

impl fmt::Display for RegistryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryOperation::Upsert => write!(f, "upsert"),
            RegistryOperation::Remove => write!(f, "remove"),
        }
    }
}

/// Local cache operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOperation {
    Set,
    Clear,
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOperation::Set => write!(f, "set"),
            CacheOperation::Clear => write!(f, "clear"),
        }
    }
}

/// Everything that can go wrong while keeping a device token registered.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The user or platform declined notification permission
    #[error("Notification permission denied")]
    PermissionDenied,

    /// Permission was granted but the push service had no token to give
    #[error("Push token not available from the platform")]
    TokenUnavailable,

    /// Required configuration (the public key) is missing
    #[error("Push messaging misconfigured: {0}")]
    Configuration(String),

    /// Push messaging cannot work in this environment at all
    #[error("Push messaging unavailable: {0}")]
    PlatformUnavailable(String),

    /// A remote registry write failed; the flow continued optimistically
    #[error("Remote registry {operation} failed: {source}")]
    RemoteWriteFailure {
        operation: RegistryOperation,
        source: StoreError,
    },

    /// A local cache write failed; the remote registry stays authoritative
    #[error("Local cache {operation} failed: {source}")]
    LocalStorageFailure {
        operation: CacheOperation,
        source: LocalStoreError,
    },
}

/// Sink for [`LifecycleError`]s.
///
/// Every report is logged at a level matching its audience: configuration
/// problems are developer-facing and logged as errors, write failures as
/// warnings, user declines as info.
#[derive(Debug, Clone, Default)]
pub struct ErrorChannel {
    tx: Option<mpsc::UnboundedSender<LifecycleError>>,
}

impl ErrorChannel {
    /// A channel that forwards every report to `tx` after logging it.
    pub fn new(tx: mpsc::UnboundedSender<LifecycleError>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A channel that only logs.
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    /// Convenience constructor returning the channel and its receiving end.
    pub fn unbounded() -> (Self, mpsc::UnboundedReceiver<LifecycleError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn report(&self, err: LifecycleError) {
        match &err {
            LifecycleError::Configuration(_) => error!("[push] {}", err),
            LifecycleError::RemoteWriteFailure { .. } | LifecycleError::LocalStorageFailure { .. } => {
                warn!("[push] {}", err)
            }
            LifecycleError::PermissionDenied
            | LifecycleError::TokenUnavailable
            | LifecycleError::PlatformUnavailable(_) => info!("[push] {}", err),
        }

        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is listening anymore
            let _ = tx.send(err);
        }
    }
}
