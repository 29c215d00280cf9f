//! Identity Token Source
//!
//! Mints this device's push token from the platform, given the configured public key.

use crate::platform::PushPlatform;
use classpush_common::TokenValue;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a mint attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    Minted(TokenValue),
    /// The platform has no token to give right now (or failed to produce one).
    NotReady,
    /// No public key is configured; the platform was not called.
    MissingConfiguration,
}

pub struct IdentityTokenSource {
    platform: Arc<dyn PushPlatform>,
    public_key: Option<String>,
}

impl IdentityTokenSource {
    /// Blank keys are treated as missing.
    pub fn new(platform: Arc<dyn PushPlatform>, public_key: Option<String>) -> Self {
        let public_key = public_key.filter(|key| !key.trim().is_empty());
        Self {
            platform,
            public_key,
        }
    }

    pub fn has_public_key(&self) -> bool {
        self.public_key.is_some()
    }

    /// Ask the platform for the device token.
    ///
    /// Every call reaches the platform; the result is not cached here. The
    /// platform may hand back the same token on repeated calls.
    pub async fn mint(&self) -> MintOutcome {
        let Some(public_key) = self.public_key.as_deref() else {
            error!("[push] Public (VAPID) key not configured; set messaging.vapid_key");
            return MintOutcome::MissingConfiguration;
        };

        match self.platform.get_token(public_key).await {
            Ok(Some(raw)) => match TokenValue::new(raw) {
                Some(token) => {
                    info!(token = %token.fingerprint(), "[push] Token generated successfully");
                    MintOutcome::Minted(token)
                }
                None => {
                    debug!("[push] Platform returned an empty token");
                    MintOutcome::NotReady
                }
            },
            Ok(None) => {
                info!("[push] No registration token available yet");
                MintOutcome::NotReady
            }
            Err(e) => {
                warn!("[push] Error getting token: {}", e);
                MintOutcome::NotReady
            }
        }
    }
}
