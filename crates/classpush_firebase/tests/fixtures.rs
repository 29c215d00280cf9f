//! Test fixtures for lifecycle tests
//!
//! This module provides a scriptable push platform, a registry store that is
//! always down, and a helper that wires a coordinator to in-memory backends.

#![allow(dead_code)]

use classpush_common::{
    BoxFuture, ChangeFeed, DeviceDescriptor, StoreError, TokenRecord, TokenStore, TokenValue,
};
use classpush_firebase::{
    CoordinatorSettings, ErrorChannel, LifecycleError, LifecycleState, LocalCache,
    MemoryKeyValueStore, MemoryTokenStore, PermissionState, PlatformCapabilities, PlatformError,
    PushPlatform, RemoteRegistry, TokenLifecycleCoordinator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const PUBLIC_KEY: &str = "BPublicVapidKeyForTests";

/// How the mock platform answers `get_token`.
#[derive(Debug, Clone)]
pub enum TokenMode {
    /// Always the same token, like a real push service for an unchanged subscription.
    Fixed(String),
    /// `device-token-1`, `device-token-2`, ... on successive calls.
    Distinct,
    /// No token available.
    Unavailable,
}

pub struct MockPlatform {
    capabilities: PlatformCapabilities,
    permission: Mutex<PermissionState>,
    prompt_answer: PermissionState,
    token_mode: TokenMode,
    mint_delay: Option<Duration>,
    prompts: AtomicUsize,
    mints: AtomicUsize,
}

impl MockPlatform {
    /// Permission already granted, distinct tokens, no delay.
    pub fn granted() -> Self {
        Self {
            capabilities: PlatformCapabilities::full(),
            permission: Mutex::new(PermissionState::Granted),
            prompt_answer: PermissionState::Granted,
            token_mode: TokenMode::Distinct,
            mint_delay: None,
            prompts: AtomicUsize::new(0),
            mints: AtomicUsize::new(0),
        }
    }

    /// Nothing asked yet; the prompt answers with `answer`.
    pub fn prompting(answer: PermissionState) -> Self {
        Self {
            permission: Mutex::new(PermissionState::NotYetAsked),
            prompt_answer: answer,
            ..Self::granted()
        }
    }

    pub fn with_capabilities(mut self, capabilities: PlatformCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_tokens(mut self, mode: TokenMode) -> Self {
        self.token_mode = mode;
        self
    }

    pub fn with_mint_delay(mut self, delay: Duration) -> Self {
        self.mint_delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn mints(&self) -> usize {
        self.mints.load(Ordering::SeqCst)
    }
}

impl PushPlatform for MockPlatform {
    fn capabilities(&self) -> BoxFuture<'_, PlatformCapabilities, PlatformError> {
        let capabilities = self.capabilities;
        Box::pin(async move { Ok(capabilities) })
    }

    fn permission_state(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    fn prompt_permission(&self) -> BoxFuture<'_, PermissionState, PlatformError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let answer = self.prompt_answer;
        // Only a definite answer sticks on the platform; a dismissed prompt stays unasked
        if answer != PermissionState::NotYetAsked {
            *self.permission.lock().unwrap() = answer;
        }
        Box::pin(async move { Ok(answer) })
    }

    fn get_token<'a>(&'a self, _public_key: &'a str) -> BoxFuture<'a, Option<String>, PlatformError> {
        let call = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
        let token = match &self.token_mode {
            TokenMode::Fixed(token) => Some(token.clone()),
            TokenMode::Distinct => Some(format!("device-token-{}", call)),
            TokenMode::Unavailable => None,
        };
        let delay = self.mint_delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(token)
        })
    }
}

/// A registry that is never reachable.
pub struct DownStore;

impl TokenStore for DownStore {
    fn upsert<'a>(&'a self, _: TokenRecord) -> BoxFuture<'a, TokenRecord, StoreError> {
        Box::pin(async { Err(StoreError::Unavailable("registry down".to_string())) })
    }

    fn remove<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, bool, StoreError> {
        Box::pin(async { Err(StoreError::Unavailable("registry down".to_string())) })
    }

    fn find<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, Option<TokenRecord>, StoreError> {
        Box::pin(async { Err(StoreError::Unavailable("registry down".to_string())) })
    }

    fn find_by_user<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Vec<TokenRecord>, StoreError> {
        Box::pin(async { Err(StoreError::Unavailable("registry down".to_string())) })
    }

    fn change_feed(&self) -> ChangeFeed {
        ChangeFeed::Poll(Duration::from_millis(10))
    }
}

/// Delegates to a memory store, optionally slowing down removals so the
/// `Refreshing` state is observable.
pub struct DelayedStore {
    inner: Arc<MemoryTokenStore>,
    remove_delay: Option<Duration>,
}

impl TokenStore for DelayedStore {
    fn upsert<'a>(&'a self, record: TokenRecord) -> BoxFuture<'a, TokenRecord, StoreError> {
        self.inner.upsert(record)
    }

    fn remove<'a>(&'a self, user_id: &'a str, token: &'a str) -> BoxFuture<'a, bool, StoreError> {
        let delay = self.remove_delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.remove(user_id, token).await
        })
    }

    fn find<'a>(&'a self, user_id: &'a str, token: &'a str) -> BoxFuture<'a, Option<TokenRecord>, StoreError> {
        self.inner.find(user_id, token)
    }

    fn find_by_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Vec<TokenRecord>, StoreError> {
        self.inner.find_by_user(user_id)
    }

    fn change_feed(&self) -> ChangeFeed {
        self.inner.change_feed()
    }
}

pub fn test_device() -> DeviceDescriptor {
    DeviceDescriptor {
        user_agent: "classpush-tests/0.1".to_string(),
        platform: "test-os".to_string(),
        language: "en-US".to_string(),
    }
}

pub fn token(value: &str) -> TokenValue {
    TokenValue::new(value).unwrap()
}

/// A coordinator wired to in-memory backends, plus handles on all of them.
pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub store: Arc<MemoryTokenStore>,
    pub cache: LocalCache,
    pub registry: RemoteRegistry,
    pub errors: mpsc::UnboundedReceiver<LifecycleError>,
    pub coordinator: Arc<TokenLifecycleCoordinator>,
}

pub struct HarnessBuilder {
    platform: MockPlatform,
    public_key: Option<String>,
    remove_on_sign_out: bool,
    cached: Option<String>,
    remove_delay: Option<Duration>,
}

impl HarnessBuilder {
    pub fn new(platform: MockPlatform) -> Self {
        Self {
            platform,
            public_key: Some(PUBLIC_KEY.to_string()),
            remove_on_sign_out: false,
            cached: None,
            remove_delay: None,
        }
    }

    pub fn without_public_key(mut self) -> Self {
        self.public_key = None;
        self
    }

    pub fn remove_on_sign_out(mut self) -> Self {
        self.remove_on_sign_out = true;
        self
    }

    pub fn slow_removals(mut self, delay: Duration) -> Self {
        self.remove_delay = Some(delay);
        self
    }

    /// Pre-populate the local cache.
    pub fn cached(mut self, value: &str) -> Self {
        self.cached = Some(value.to_string());
        self
    }

    pub async fn build(self) -> Harness {
        let (channel, errors) = ErrorChannel::unbounded();
        let platform = Arc::new(self.platform);
        let store = Arc::new(MemoryTokenStore::new());
        let delayed = Arc::new(DelayedStore {
            inner: store.clone(),
            remove_delay: self.remove_delay,
        });
        let registry = RemoteRegistry::new(delayed, channel.clone());
        let cache = LocalCache::new(Arc::new(MemoryKeyValueStore::new()), "fcm_token", channel.clone());
        if let Some(value) = &self.cached {
            cache.set(&token(value));
        }

        let coordinator = TokenLifecycleCoordinator::new(
            platform.clone(),
            self.public_key,
            cache.clone(),
            registry.clone(),
            CoordinatorSettings {
                remove_on_sign_out: self.remove_on_sign_out,
                device: test_device(),
            },
            channel,
        )
        .await;

        Harness {
            platform,
            store,
            cache,
            registry,
            errors,
            coordinator,
        }
    }
}

impl Harness {
    /// Token values the registry holds for `user_id`, sorted.
    pub async fn registered(&self, user_id: &str) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .registry
            .tokens_for_user(user_id)
            .await
            .into_iter()
            .map(|record| record.token)
            .collect();
        tokens.sort();
        tokens
    }

    /// Drain every error reported so far.
    pub fn reported(&mut self) -> Vec<LifecycleError> {
        let mut reported = Vec::new();
        while let Ok(err) = self.errors.try_recv() {
            reported.push(err);
        }
        reported
    }
}

/// Wait until the coordinator reaches `expected`, failing after two seconds.
pub async fn wait_for_state(rx: &mut watch::Receiver<LifecycleState>, expected: LifecycleState) {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|state| *state == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", expected))
        .expect("coordinator dropped");
}

/// Record every state the coordinator passes through.
pub fn record_states(
    mut rx: watch::Receiver<LifecycleState>,
) -> Arc<Mutex<Vec<LifecycleState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            sink.lock().unwrap().push(state);
        }
    });
    seen
}
