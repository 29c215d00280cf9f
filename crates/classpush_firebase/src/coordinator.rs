//! Token Lifecycle Coordinator
//!
//! Drives a device token through its lifecycle for one signed-in user:
//!
//! ```text
//! Idle -> Checking -> Reusing | Acquiring -> Registered -> Watching
//!                          Watching -> Refreshing -> Registered -> Watching
//!                          any -> Idle (sign-out)
//! ```
//!
//! Only one transition runs at a time. A sign-in or refresh arriving while
//! another transition holds the busy lock is coalesced. Sign-out never waits:
//! it starts a new session epoch, and a transition that finds its epoch stale
//! after any await drops its result.
//!
//! No collaborator failure escapes a trigger method. Failures are reported on
//! the [`ErrorChannel`] and leave the coordinator in a `Failed` state.

use crate::error::{ErrorChannel, LifecycleError};
use crate::local_cache::LocalCache;
use crate::permission::{PermissionGate, PermissionOutcome};
use crate::platform::{PlatformCapabilities, PushPlatform};
use crate::registry::{RemoteRegistry, WatchHandle, WatchPriming};
use crate::token_source::{IdentityTokenSource, MintOutcome};
use classpush_common::{DeviceDescriptor, TokenValue};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why a session ended up without a registered token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    PermissionDenied,
    Configuration,
    PlatformUnavailable,
    /// Permission was granted but the platform had no token. Terminal for the
    /// session, like a denial.
    TokenUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Checking,
    Reusing,
    Acquiring,
    Registered,
    Watching,
    Refreshing,
    Failed(FailureReason),
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Failed(reason) => write!(f, "Failed({:?})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// What happened to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The trigger ran to completion and left the coordinator in this state.
    Completed(LifecycleState),
    /// Another transition for the same user was in flight; nothing ran.
    Coalesced,
    /// A sign-out or a different user's sign-in overtook the trigger.
    Superseded,
}

/// Policy knobs for a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Delete this device's registry record on sign-out.
    pub remove_on_sign_out: bool,
    /// Metadata written next to every token.
    pub device: DeviceDescriptor,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            remove_on_sign_out: false,
            device: DeviceDescriptor::detect(),
        }
    }
}

/// Why a transition stopped early.
enum Halt {
    Superseded,
    Failed(FailureReason),
}

/// What started a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshCause {
    Explicit,
    RecordMissing,
}

#[derive(Default)]
struct Session {
    epoch: u64,
    user_id: Option<String>,
    token: Option<TokenValue>,
    watch: Option<WatchHandle>,
}

enum Entry<'a> {
    Run(u64, tokio::sync::MutexGuard<'a, ()>),
    Skip(TriggerOutcome),
}

pub struct TokenLifecycleCoordinator {
    weak_self: Weak<Self>,
    gate: PermissionGate,
    source: IdentityTokenSource,
    cache: LocalCache,
    registry: RemoteRegistry,
    settings: CoordinatorSettings,
    errors: ErrorChannel,
    push_supported: bool,
    busy: tokio::sync::Mutex<()>,
    session: Mutex<Session>,
    state: watch::Sender<LifecycleState>,
}

impl TokenLifecycleCoordinator {
    /// Creates a coordinator and probes the platform's capabilities once.
    ///
    /// # Arguments
    ///
    /// * `platform` - The host's notification and push subsystem
    /// * `public_key` - Push service public (VAPID) key; `None` or blank disables minting
    /// * `cache` - Device-local token slot
    /// * `registry` - Remote, per-user token registry
    /// * `settings` - Sign-out policy and device metadata
    /// * `errors` - Where lifecycle failures are reported
    pub async fn new(
        platform: Arc<dyn PushPlatform>,
        public_key: Option<String>,
        cache: LocalCache,
        registry: RemoteRegistry,
        settings: CoordinatorSettings,
        errors: ErrorChannel,
    ) -> Arc<Self> {
        let capabilities = match platform.capabilities().await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                warn!("[push] Capability probe failed: {}", e);
                PlatformCapabilities::default()
            }
        };

        let push_supported = capabilities.supports_push();
        if push_supported {
            debug!("[push] Platform supports push messaging");
        } else {
            errors.report(LifecycleError::PlatformUnavailable(format!(
                "missing {}",
                capabilities.missing().join(", ")
            )));
        }

        let gate = PermissionGate::new(Arc::clone(&platform), capabilities.notifications);
        let source = IdentityTokenSource::new(platform, public_key);
        let (state, _) = watch::channel(LifecycleState::Idle);

        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            gate,
            source,
            cache,
            registry,
            settings,
            errors,
            push_supported,
            busy: tokio::sync::Mutex::new(()),
            session: Mutex::new(Session::default()),
            state,
        })
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// The token registered for the current session, if any.
    pub fn current_token(&self) -> Option<TokenValue> {
        self.session().token.clone()
    }

    pub fn current_user(&self) -> Option<String> {
        self.session().user_id.clone()
    }

    pub fn push_supported(&self) -> bool {
        self.push_supported
    }

    /// A user signed in: reuse the cached token or acquire a new one, then
    /// register it and watch the registry for its removal.
    pub async fn on_sign_in(&self, user_id: &str) -> TriggerOutcome {
        let (epoch, _busy) = match self.enter(user_id, true).await {
            Entry::Run(epoch, guard) => (epoch, guard),
            Entry::Skip(outcome) => return outcome,
        };
        info!(user_id, "[push] Initializing push notifications");

        let result = self.run_sign_in(epoch, user_id).await;
        self.finish(epoch, result)
    }

    /// The user signed out: stop watching and return to `Idle`.
    ///
    /// The registry record is left in place unless `remove_on_sign_out` is set.
    pub async fn on_sign_out(&self) -> TriggerOutcome {
        let (user_id, token, watch) = {
            let mut session = self.session();
            session.epoch += 1;
            self.state.send_replace(LifecycleState::Idle);
            (session.user_id.take(), session.token.take(), session.watch.take())
        };

        if let Some(watch) = watch {
            watch.unsubscribe();
        }
        info!(user_id = ?user_id, "[push] Signed out, token watch stopped");

        if self.settings.remove_on_sign_out {
            let token = token.or_else(|| self.cache.get());
            if let (Some(user_id), Some(token)) = (user_id, token) {
                self.registry.remove(&user_id, &token).await;
            }
        }

        TriggerOutcome::Completed(LifecycleState::Idle)
    }

    /// Replace the current token with a freshly minted one.
    ///
    /// `previous_token` is removed from the registry; when unknown the
    /// session's or the cached token is used instead. A denial remembered for
    /// this session is forgotten, so the user may be prompted again.
    pub async fn on_explicit_refresh_requested(
        &self,
        user_id: &str,
        previous_token: Option<&str>,
    ) -> TriggerOutcome {
        let (epoch, _busy) = match self.enter(user_id, false).await {
            Entry::Run(epoch, guard) => (epoch, guard),
            Entry::Skip(outcome) => return outcome,
        };
        info!(user_id, "[push] Token refresh requested");
        self.gate.reset_session();

        let previous = previous_token
            .and_then(TokenValue::new)
            .or_else(|| self.current_token())
            .or_else(|| self.cache.get());

        let result = self
            .refresh(epoch, user_id, previous, RefreshCause::Explicit)
            .await;
        self.finish(epoch, result)
    }

    /// Called from an existence watch armed under `epoch` for `token`.
    async fn handle_missing(&self, epoch: u64, token: TokenValue) -> TriggerOutcome {
        let _busy = self.busy.lock().await;

        let user_id = {
            let session = self.session();
            let current = session.epoch == epoch && session.token.as_ref() == Some(&token);
            match session.user_id.clone() {
                Some(user_id) if current => user_id,
                _ => {
                    debug!(token = %token.fingerprint(), "[push] Ignoring stale watch callback");
                    return TriggerOutcome::Superseded;
                }
            }
        };

        info!(user_id = %user_id, token = %token.fingerprint(), "[push] Token no longer exists, refreshing");
        let result = self
            .refresh(epoch, &user_id, Some(token), RefreshCause::RecordMissing)
            .await;
        self.finish(epoch, result)
    }

    /// Take the busy lock for `user_id`, or decide not to run.
    ///
    /// With `new_session` set (sign-in) or for a user other than the current
    /// one, a new epoch starts, superseding whatever is in flight.
    async fn enter(&self, user_id: &str, new_session: bool) -> Entry<'_> {
        match self.busy.try_lock() {
            Ok(guard) => {
                let epoch = if new_session || !self.is_current_user(user_id) {
                    self.begin_session(user_id)
                } else {
                    self.session().epoch
                };
                Entry::Run(epoch, guard)
            }
            Err(_) if self.is_current_user(user_id) => {
                debug!(user_id, "[push] Transition in flight, trigger coalesced");
                Entry::Skip(TriggerOutcome::Coalesced)
            }
            Err(_) => {
                let epoch = self.begin_session(user_id);
                let guard = self.busy.lock().await;
                if self.is_current(epoch) {
                    Entry::Run(epoch, guard)
                } else {
                    Entry::Skip(TriggerOutcome::Superseded)
                }
            }
        }
    }

    async fn run_sign_in(&self, epoch: u64, user_id: &str) -> Result<LifecycleState, Halt> {
        if !self.push_supported {
            debug!("[push] Push messaging unsupported, skipping");
            return Err(Halt::Failed(FailureReason::PlatformUnavailable));
        }

        self.transition(epoch, LifecycleState::Checking)?;
        match self.cache.get() {
            Some(token) => {
                debug!(token = %token.fingerprint(), "[push] Reusing cached token");
                self.transition(epoch, LifecycleState::Reusing)?;
                let confirmed = self
                    .registry
                    .upsert(user_id, &token, &self.settings.device)
                    .await;
                self.register(epoch, user_id, token, Some(priming_for(confirmed)))
            }
            None => {
                let (token, confirmed) = self.acquire(epoch, user_id).await?;
                self.register(epoch, user_id, token, Some(priming_for(confirmed)))
            }
        }
    }

    /// Permission, mint, registry upsert, cache. Returns the token and
    /// whether the registry confirmed the write.
    async fn acquire(&self, epoch: u64, user_id: &str) -> Result<(TokenValue, bool), Halt> {
        self.transition(epoch, LifecycleState::Acquiring)?;

        let permission = self.gate.request_permission().await;
        self.ensure_current(epoch)?;
        if permission == PermissionOutcome::Denied {
            self.errors.report(LifecycleError::PermissionDenied);
            return Err(Halt::Failed(FailureReason::PermissionDenied));
        }

        let minted = self.source.mint().await;
        self.ensure_current(epoch)?;
        let token = match minted {
            MintOutcome::Minted(token) => token,
            MintOutcome::MissingConfiguration => {
                self.errors.report(LifecycleError::Configuration(
                    "public (VAPID) key not configured".to_string(),
                ));
                return Err(Halt::Failed(FailureReason::Configuration));
            }
            MintOutcome::NotReady => {
                self.errors.report(LifecycleError::TokenUnavailable);
                return Err(Halt::Failed(FailureReason::TokenUnavailable));
            }
        };

        let confirmed = self
            .registry
            .upsert(user_id, &token, &self.settings.device)
            .await;
        self.ensure_current(epoch)?;
        self.cache.set(&token);
        Ok((token, confirmed))
    }

    async fn refresh(
        &self,
        epoch: u64,
        user_id: &str,
        previous: Option<TokenValue>,
        cause: RefreshCause,
    ) -> Result<LifecycleState, Halt> {
        if !self.push_supported {
            return Err(Halt::Failed(FailureReason::PlatformUnavailable));
        }

        let watch = {
            let mut session = self.session();
            if session.epoch != epoch {
                return Err(Halt::Superseded);
            }
            session.token = None;
            self.state.send_replace(LifecycleState::Refreshing);
            session.watch.take()
        };
        drop(watch);

        if let Some(previous) = &previous {
            self.registry.remove(user_id, previous).await;
            self.ensure_current(epoch)?;
        }
        self.cache.clear();

        let (token, confirmed) = self.acquire(epoch, user_id).await?;
        // An unconfirmed write after the record vanished would just fire the
        // watch again
        let priming = if confirmed || cause == RefreshCause::Explicit {
            Some(priming_for(confirmed))
        } else {
            warn!(token = %token.fingerprint(), "[push] Refreshed token not confirmed by registry, not watching");
            None
        };
        self.register(epoch, user_id, token, priming)
    }

    /// Record `token` as the session's token and, if asked, arm the existence watch.
    fn register(
        &self,
        epoch: u64,
        user_id: &str,
        token: TokenValue,
        priming: Option<WatchPriming>,
    ) -> Result<LifecycleState, Halt> {
        {
            let mut session = self.session();
            if session.epoch != epoch {
                return Err(Halt::Superseded);
            }
            session.token = Some(token.clone());
            self.state.send_replace(LifecycleState::Registered);
        }
        info!(user_id, token = %token.fingerprint(), "[push] Token registered");

        let Some(priming) = priming else {
            return Ok(LifecycleState::Registered);
        };

        let coordinator = self.weak_self.clone();
        let watched = token.clone();
        let handle = self
            .registry
            .watch_existence(user_id, &token, priming, move || {
                if let Some(coordinator) = coordinator.upgrade() {
                    tokio::spawn(async move {
                        coordinator.handle_missing(epoch, watched).await;
                    });
                }
            });

        let mut session = self.session();
        if session.epoch != epoch {
            // Dropping the handle stops the watch
            return Err(Halt::Superseded);
        }
        session.watch = Some(handle);
        self.state.send_replace(LifecycleState::Watching);
        Ok(LifecycleState::Watching)
    }

    fn finish(&self, epoch: u64, result: Result<LifecycleState, Halt>) -> TriggerOutcome {
        match result {
            Ok(state) => TriggerOutcome::Completed(state),
            Err(Halt::Superseded) => {
                debug!("[push] Transition superseded");
                TriggerOutcome::Superseded
            }
            Err(Halt::Failed(reason)) => {
                let failed = LifecycleState::Failed(reason);
                match self.transition(epoch, failed) {
                    Ok(()) => TriggerOutcome::Completed(failed),
                    Err(_) => TriggerOutcome::Superseded,
                }
            }
        }
    }

    fn transition(&self, epoch: u64, state: LifecycleState) -> Result<(), Halt> {
        let session = self.session();
        if session.epoch != epoch {
            return Err(Halt::Superseded);
        }
        debug!(%state, "[push] State change");
        self.state.send_replace(state);
        Ok(())
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), Halt> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            Err(Halt::Superseded)
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.session().epoch == epoch
    }

    fn is_current_user(&self, user_id: &str) -> bool {
        self.session().user_id.as_deref() == Some(user_id)
    }

    /// Start a new epoch for `user_id`, dropping any watch from the old one.
    fn begin_session(&self, user_id: &str) -> u64 {
        let (epoch, watch) = {
            let mut session = self.session();
            session.epoch += 1;
            session.user_id = Some(user_id.to_string());
            session.token = None;
            (session.epoch, session.watch.take())
        };
        drop(watch);
        self.gate.reset_session();
        epoch
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        // Session updates are single assignments; a panicking holder leaves it consistent
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A rejected write is treated as landed, but its absence only counts once
/// the record has shown up.
fn priming_for(confirmed: bool) -> WatchPriming {
    if confirmed {
        WatchPriming::AfterWrite
    } else {
        WatchPriming::UntilPresent
    }
}
