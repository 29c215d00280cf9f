// --- File: crates/classpush_common/src/services.rs ---
//! Store abstractions for the remote token registry.
//!
//! This module provides the trait every remote registry backend implements.
//! Keeping the coordinator behind this trait allows the in-memory, Firestore
//! and SQL backends to be swapped without touching the lifecycle logic, and
//! makes the lifecycle testable without a network.

use crate::error::StoreError;
use crate::models::TokenRecord;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;

/// Type alias for a boxed future that returns a Result
pub type BoxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// How a store announces that its contents may have changed.
#[derive(Debug, Clone)]
pub enum ChangeFeed {
    /// The store bumps a revision counter on every write.
    Revisions(watch::Receiver<u64>),
    /// The store cannot push changes; watchers re-read it at this interval.
    Poll(Duration),
}

/// A remote, per-user, multi-valued token store.
///
/// Records are keyed by `(user_id, token)`: a user may own many tokens (one per
/// device), but never two records for the same literal token value.
pub trait TokenStore: Send + Sync {
    /// Insert or merge a record. An existing record keeps its `created_at`.
    fn upsert<'a>(&'a self, record: TokenRecord) -> BoxFuture<'a, TokenRecord, StoreError>;

    /// Delete a record. Returns `false` if there was nothing to delete.
    fn remove<'a>(&'a self, user_id: &'a str, token: &'a str) -> BoxFuture<'a, bool, StoreError>;

    /// Look up a single record.
    fn find<'a>(
        &'a self,
        user_id: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Option<TokenRecord>, StoreError>;

    /// All records owned by a user.
    fn find_by_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Vec<TokenRecord>, StoreError>;

    /// The change notification mechanism watchers should use.
    fn change_feed(&self) -> ChangeFeed;
}
