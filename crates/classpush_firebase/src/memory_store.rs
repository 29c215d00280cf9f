//! In-process token store
//!
//! Keeps records in a map and bumps a revision counter on every change, so
//! existence watchers react immediately instead of polling.

use classpush_common::{BoxFuture, ChangeFeed, StoreError, TokenRecord, TokenStore};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::watch;

type RecordKey = (String, String);

#[derive(Debug)]
pub struct MemoryTokenStore {
    records: Mutex<BTreeMap<RecordKey, TokenRecord>>,
    revisions: watch::Sender<u64>,
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            records: Mutex::new(BTreeMap::new()),
            revisions,
        }
    }

    /// Number of records across all users.
    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a record behind the coordinator's back, the way an admin
    /// console or a server-side cleanup job would.
    pub fn evict(&self, user_id: &str, token: &str) -> bool {
        let removed = self
            .records
            .lock()
            .map(|mut records| {
                records
                    .remove(&(user_id.to_string(), token.to_string()))
                    .is_some()
            })
            .unwrap_or(false);
        if removed {
            self.bump();
        }
        removed
    }

    fn bump(&self) {
        self.revisions.send_modify(|revision| *revision += 1);
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

impl TokenStore for MemoryTokenStore {
    fn upsert<'a>(&'a self, record: TokenRecord) -> BoxFuture<'a, TokenRecord, StoreError> {
        Box::pin(async move {
            let stored = {
                let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
                let key = (record.user_id.clone(), record.token.clone());
                let merged = record.merged_over(records.get(&key));
                records.insert(key, merged.clone());
                merged
            };
            self.bump();
            Ok(stored)
        })
    }

    fn remove<'a>(&'a self, user_id: &'a str, token: &'a str) -> BoxFuture<'a, bool, StoreError> {
        Box::pin(async move {
            let removed = {
                let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
                records
                    .remove(&(user_id.to_string(), token.to_string()))
                    .is_some()
            };
            if removed {
                self.bump();
            }
            Ok(removed)
        })
    }

    fn find<'a>(
        &'a self,
        user_id: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Option<TokenRecord>, StoreError> {
        Box::pin(async move {
            let records = self.records.lock().map_err(|_| Self::poisoned())?;
            Ok(records.get(&(user_id.to_string(), token.to_string())).cloned())
        })
    }

    fn find_by_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Vec<TokenRecord>, StoreError> {
        Box::pin(async move {
            let records = self.records.lock().map_err(|_| Self::poisoned())?;
            Ok(records
                .values()
                .filter(|record| record.user_id == user_id)
                .cloned()
                .collect())
        })
    }

    fn change_feed(&self) -> ChangeFeed {
        ChangeFeed::Revisions(self.revisions.subscribe())
    }
}
