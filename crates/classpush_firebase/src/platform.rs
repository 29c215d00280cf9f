//! Host platform abstraction
//!
//! The coordinator never talks to a notification API directly. The host
//! (browser shell, desktop app, mobile bridge) implements [`PushPlatform`]
//! and hands it to the coordinator.

use classpush_common::BoxFuture;
use thiserror::Error;

/// Errors raised by the host platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The requested capability does not exist on this platform
    #[error("Not supported on this platform: {0}")]
    Unsupported(String),

    /// The platform call failed
    #[error("Platform call failed: {0}")]
    Failed(String),
}

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// The user has not answered a prompt yet.
    NotYetAsked,
}

/// Result of the one-time capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformCapabilities {
    /// A notification permission API exists.
    pub notifications: bool,
    /// The push messaging service is available to this app.
    pub push_messaging: bool,
    /// The app runs in a context the push service accepts (e.g. HTTPS).
    pub secure_context: bool,
}

impl PlatformCapabilities {
    /// Every capability present.
    pub fn full() -> Self {
        Self {
            notifications: true,
            push_messaging: true,
            secure_context: true,
        }
    }

    /// Whether push tokens can be obtained at all.
    pub fn supports_push(&self) -> bool {
        self.notifications && self.push_messaging && self.secure_context
    }

    /// Human readable list of what is missing, for log lines.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.notifications {
            missing.push("notification API");
        }
        if !self.push_messaging {
            missing.push("push messaging");
        }
        if !self.secure_context {
            missing.push("secure context");
        }
        missing
    }
}

/// The host's notification and push messaging subsystem.
pub trait PushPlatform: Send + Sync {
    /// Probe which capabilities exist. Called once per coordinator.
    fn capabilities(&self) -> BoxFuture<'_, PlatformCapabilities, PlatformError>;

    /// Current permission, without prompting.
    fn permission_state(&self) -> PermissionState;

    /// Show the user-facing permission prompt and return its outcome.
    fn prompt_permission(&self) -> BoxFuture<'_, PermissionState, PlatformError>;

    /// Ask the push service for this device's token.
    ///
    /// `Ok(None)` (or an empty string) means no token is available yet.
    fn get_token<'a>(&'a self, public_key: &'a str) -> BoxFuture<'a, Option<String>, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_push_requires_everything() {
        assert!(PlatformCapabilities::full().supports_push());

        let insecure = PlatformCapabilities {
            secure_context: false,
            ..PlatformCapabilities::full()
        };
        assert!(!insecure.supports_push());
        assert_eq!(insecure.missing(), vec!["secure context"]);

        assert_eq!(PlatformCapabilities::default().missing().len(), 3);
    }
}
