//! Remote Registry
//!
//! Best-effort wrapper around a [`TokenStore`]: writes never fail the caller,
//! failures go to the [`ErrorChannel`]. Also owns the existence watch that
//! tells the coordinator when its token disappears remotely.

use crate::error::{ErrorChannel, LifecycleError, RegistryOperation};
use classpush_common::{ChangeFeed, DeviceDescriptor, TokenRecord, TokenStore, TokenValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct RemoteRegistry {
    store: Arc<dyn TokenStore>,
    errors: ErrorChannel,
}

impl RemoteRegistry {
    pub fn new(store: Arc<dyn TokenStore>, errors: ErrorChannel) -> Self {
        Self { store, errors }
    }

    /// Write or refresh the record for `token`.
    ///
    /// Returns whether the write was confirmed by the store.
    pub async fn upsert(&self, user_id: &str, token: &TokenValue, device: &DeviceDescriptor) -> bool {
        let record = TokenRecord::new(user_id, token, device.clone());
        match self.store.upsert(record).await {
            Ok(_) => {
                info!(user_id, token = %token.fingerprint(), "[push] Token saved to registry");
                true
            }
            Err(source) => {
                self.errors.report(LifecycleError::RemoteWriteFailure {
                    operation: RegistryOperation::Upsert,
                    source,
                });
                false
            }
        }
    }

    /// Delete the record for `token` if it exists.
    ///
    /// Returns whether a record was actually removed.
    pub async fn remove(&self, user_id: &str, token: &TokenValue) -> bool {
        match self.store.remove(user_id, token.as_str()).await {
            Ok(removed) => {
                debug!(user_id, token = %token.fingerprint(), removed, "[push] Token removed from registry");
                removed
            }
            Err(source) => {
                self.errors.report(LifecycleError::RemoteWriteFailure {
                    operation: RegistryOperation::Remove,
                    source,
                });
                false
            }
        }
    }

    /// All tokens a user has registered, across devices. Errors read as empty.
    pub async fn tokens_for_user(&self, user_id: &str) -> Vec<TokenRecord> {
        match self.store.find_by_user(user_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(user_id, "[push] Error getting user tokens: {}", e);
                Vec::new()
            }
        }
    }

    /// Drop records the push service reported as invalid or unregistered.
    ///
    /// Returns how many records were actually removed.
    pub async fn prune_invalid(&self, user_id: &str, tokens: &[TokenValue]) -> usize {
        let mut removed = 0;
        for token in tokens {
            if self.remove(user_id, token).await {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(user_id, removed, "[push] Removed invalid token(s) from registry");
        }
        removed
    }

    /// Watch the record for `token` and call `on_missing` once it is gone.
    ///
    /// `on_missing` fires at most once. How the first absent reads are
    /// treated depends on `priming`, see [`WatchPriming`]. Read errors never
    /// fire.
    ///
    /// The change feed is armed before this returns, so a removal that lands
    /// before the watch task first runs is still observed.
    ///
    /// The watch ends when the returned handle is dropped or unsubscribed.
    pub fn watch_existence<F>(
        &self,
        user_id: &str,
        token: &TokenValue,
        priming: WatchPriming,
        on_missing: F,
    ) -> WatchHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        let token = token.clone();
        let mut feed = FeedWaiter::new(store.change_feed());

        let task = tokio::spawn(async move {
            let mut priming = priming;

            loop {
                match store.find(&user_id, token.as_str()).await {
                    Ok(Some(_)) => priming = WatchPriming::Unprimed,
                    Ok(None) if priming != WatchPriming::Unprimed => {
                        debug!(token = %token.fingerprint(), "[push] Record not visible yet after write");
                        if priming == WatchPriming::AfterWrite {
                            priming = WatchPriming::Unprimed;
                        }
                    }
                    Ok(None) => {
                        info!(
                            user_id = %user_id,
                            token = %token.fingerprint(),
                            "[push] Token no longer exists in registry"
                        );
                        on_missing();
                        return;
                    }
                    Err(e) => warn!("[push] Error listening to token changes: {}", e),
                }

                if !feed.next_change().await {
                    debug!("[push] Registry change feed closed, watch ends");
                    return;
                }
            }
        });

        WatchHandle { task: Some(task) }
    }
}

/// How a new existence watch treats the record being absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPriming {
    /// Any absent read fires.
    Unprimed,
    /// A write was just confirmed: an absent first read is propagation delay.
    AfterWrite,
    /// The write was not confirmed: absence only counts once the record has
    /// been seen present.
    UntilPresent,
}

enum FeedWaiter {
    Revisions(watch::Receiver<u64>),
    Poll(Interval),
}

impl FeedWaiter {
    fn new(feed: ChangeFeed) -> Self {
        match feed {
            ChangeFeed::Revisions(mut rx) => {
                // The read that follows observes everything up to this revision
                rx.borrow_and_update();
                FeedWaiter::Revisions(rx)
            }
            ChangeFeed::Poll(period) => {
                let period = period.max(Duration::from_millis(1));
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                FeedWaiter::Poll(interval)
            }
        }
    }

    /// Wait until the store may have changed. `false` once no change can come.
    async fn next_change(&mut self) -> bool {
        match self {
            FeedWaiter::Revisions(rx) => rx.changed().await.is_ok(),
            FeedWaiter::Poll(interval) => {
                interval.tick().await;
                true
            }
        }
    }
}

/// Live existence subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct WatchHandle {
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn unsubscribe(mut self) {
        self.abort();
    }

    /// Whether the watch is still running (it stops by itself after firing).
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
