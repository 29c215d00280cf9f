//! Permission Gate
//!
//! Asks the platform for notification permission at most once per session and
//! never lets a platform failure escape.

use crate::platform::{PermissionState, PushPlatform};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The gate's answer. A prompt the user dismissed counts as `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
}

pub struct PermissionGate {
    platform: Arc<dyn PushPlatform>,
    notifications_available: bool,
    denied_this_session: AtomicBool,
}

impl PermissionGate {
    /// # Arguments
    ///
    /// * `platform` - The host platform
    /// * `notifications_available` - Result of the capability probe; when `false` the
    ///   gate answers `Denied` without ever touching the platform
    pub fn new(platform: Arc<dyn PushPlatform>, notifications_available: bool) -> Self {
        Self {
            platform,
            notifications_available,
            denied_this_session: AtomicBool::new(false),
        }
    }

    /// Current permission without prompting.
    pub fn current(&self) -> PermissionState {
        if !self.notifications_available {
            return PermissionState::Denied;
        }
        self.platform.permission_state()
    }

    /// Resolve notification permission, prompting only when nothing is known yet.
    pub async fn request_permission(&self) -> PermissionOutcome {
        if !self.notifications_available {
            warn!("[push] Notification API not available");
            return PermissionOutcome::Denied;
        }

        match self.platform.permission_state() {
            PermissionState::Granted => return PermissionOutcome::Granted,
            PermissionState::Denied => {
                debug!("[push] Notification permission previously denied");
                return PermissionOutcome::Denied;
            }
            PermissionState::NotYetAsked => {}
        }

        if self.denied_this_session.load(Ordering::SeqCst) {
            debug!("[push] Permission denied earlier in this session, not prompting again");
            return PermissionOutcome::Denied;
        }

        let outcome = match self.platform.prompt_permission().await {
            Ok(PermissionState::Granted) => PermissionOutcome::Granted,
            Ok(state) => {
                info!("[push] Notification permission: {:?}", state);
                PermissionOutcome::Denied
            }
            Err(e) => {
                warn!("[push] Error requesting notification permission: {}", e);
                PermissionOutcome::Denied
            }
        };

        if outcome == PermissionOutcome::Denied {
            self.denied_this_session.store(true, Ordering::SeqCst);
        }
        outcome
    }

    /// Forget a denial remembered for this session.
    ///
    /// Called when a new session starts or the user explicitly asks again.
    pub fn reset_session(&self) {
        self.denied_this_session.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlatformCapabilities, PlatformError};
    use classpush_common::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct PromptPlatform {
        state: Mutex<PermissionState>,
        answer: Result<PermissionState, PlatformError>,
        prompts: AtomicUsize,
    }

    impl PromptPlatform {
        fn new(state: PermissionState, answer: Result<PermissionState, PlatformError>) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                answer,
                prompts: AtomicUsize::new(0),
            })
        }

        fn prompts(&self) -> usize {
            self.prompts.load(Ordering::SeqCst)
        }
    }

    impl PushPlatform for PromptPlatform {
        fn capabilities(&self) -> BoxFuture<'_, PlatformCapabilities, PlatformError> {
            Box::pin(async { Ok(PlatformCapabilities::full()) })
        }

        fn permission_state(&self) -> PermissionState {
            *self.state.lock().unwrap()
        }

        fn prompt_permission(&self) -> BoxFuture<'_, PermissionState, PlatformError> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            let answer = self.answer.clone();
            Box::pin(async move { answer })
        }

        fn get_token<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Option<String>, PlatformError> {
            Box::pin(async { Ok(None) })
        }
    }

    #[tokio::test]
    async fn test_no_notification_api_denies_without_prompt() {
        let platform = PromptPlatform::new(PermissionState::NotYetAsked, Ok(PermissionState::Granted));
        let gate = PermissionGate::new(platform.clone(), false);

        assert_eq!(gate.request_permission().await, PermissionOutcome::Denied);
        assert_eq!(gate.current(), PermissionState::Denied);
        assert_eq!(platform.prompts(), 0);
    }

    #[tokio::test]
    async fn test_previously_granted_skips_prompt() {
        let platform = PromptPlatform::new(PermissionState::Granted, Ok(PermissionState::Denied));
        let gate = PermissionGate::new(platform.clone(), true);

        assert_eq!(gate.request_permission().await, PermissionOutcome::Granted);
        assert_eq!(platform.prompts(), 0);
    }

    #[tokio::test]
    async fn test_previously_denied_skips_prompt() {
        let platform = PromptPlatform::new(PermissionState::Denied, Ok(PermissionState::Granted));
        let gate = PermissionGate::new(platform.clone(), true);

        assert_eq!(gate.request_permission().await, PermissionOutcome::Denied);
        assert_eq!(platform.prompts(), 0);
    }

    #[tokio::test]
    async fn test_prompt_outcome_is_returned() {
        let platform = PromptPlatform::new(PermissionState::NotYetAsked, Ok(PermissionState::Granted));
        let gate = PermissionGate::new(platform.clone(), true);

        assert_eq!(gate.request_permission().await, PermissionOutcome::Granted);
        assert_eq!(platform.prompts(), 1);
    }

    #[tokio::test]
    async fn test_denial_is_sticky_within_session() {
        // A dismissed prompt leaves the platform at NotYetAsked
        let platform = PromptPlatform::new(
            PermissionState::NotYetAsked,
            Ok(PermissionState::NotYetAsked),
        );
        let gate = PermissionGate::new(platform.clone(), true);

        assert_eq!(gate.request_permission().await, PermissionOutcome::Denied);
        assert_eq!(gate.request_permission().await, PermissionOutcome::Denied);
        assert_eq!(platform.prompts(), 1);

        gate.reset_session();
        assert_eq!(gate.request_permission().await, PermissionOutcome::Denied);
        assert_eq!(platform.prompts(), 2);
    }

    #[tokio::test]
    async fn test_platform_error_is_denied() {
        let platform = PromptPlatform::new(
            PermissionState::NotYetAsked,
            Err(PlatformError::Failed("prompt blocked".to_string())),
        );
        let gate = PermissionGate::new(platform.clone(), true);

        assert_eq!(gate.request_permission().await, PermissionOutcome::Denied);
        assert_eq!(platform.prompts(), 1);
    }

    #[test]
    fn test_current_reflects_platform() {
        let platform = PromptPlatform::new(PermissionState::Granted, Ok(PermissionState::Granted));
        let gate = PermissionGate::new(platform.clone(), true);
        assert_eq!(gate.current(), PermissionState::Granted);

        *platform.state.lock().unwrap() = PermissionState::NotYetAsked;
        assert_eq!(gate.current(), PermissionState::NotYetAsked);
    }
}
