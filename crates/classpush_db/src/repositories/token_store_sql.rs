//! SQL implementation of the remote token store
//!
//! Records live in a single `fcm_tokens` table keyed by `(user_id, token)`.
//! Timestamps are stored as RFC 3339 text.

use crate::error::DbError;
use crate::DbClient;
use chrono::{DateTime, Utc};
use classpush_common::{
    token_fingerprint, BoxFuture, ChangeFeed, DeviceDescriptor, StoreError, TokenRecord,
    TokenStore,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, error, info};

const SELECT_COLUMNS: &str =
    "user_id, token, created_at, updated_at, user_agent, platform, language";

/// SQL implementation of the remote token store
#[derive(Debug, Clone)]
pub struct SqlTokenStore {
    /// The database client
    db_client: DbClient,
    /// How often existence watchers re-read the table
    poll_interval: Duration,
}

impl SqlTokenStore {
    /// Create a new SQL token store
    ///
    /// # Arguments
    ///
    /// * `db_client` - The database client
    /// * `poll_interval` - Interval at which watchers poll for removed records
    pub fn new(db_client: DbClient, poll_interval: Duration) -> Self {
        Self {
            db_client,
            poll_interval,
        }
    }

    /// Create the `fcm_tokens` table if it doesn't exist
    pub async fn init_schema(&self) -> Result<(), DbError> {
        debug!("Initializing token registry schema");

        let query = r#"
            CREATE TABLE IF NOT EXISTS fcm_tokens (
                user_id TEXT NOT NULL,
                token TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                user_agent TEXT NOT NULL DEFAULT '',
                platform TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (user_id, token)
            )
        "#;

        self.db_client.execute(query).await?;

        info!("Token registry schema initialized successfully");
        Ok(())
    }

    async fn upsert_record(&self, record: TokenRecord) -> Result<TokenRecord, DbError> {
        debug!(
            user_id = %record.user_id,
            token = %token_fingerprint(&record.token),
            "Upserting token record"
        );

        // created_at is left untouched on conflict, everything else follows the write
        let query = format!(
            r#"
            INSERT INTO fcm_tokens (user_id, token, created_at, updated_at, user_agent, platform, language)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id, token) DO UPDATE SET
                updated_at = excluded.updated_at,
                user_agent = excluded.user_agent,
                platform = excluded.platform,
                language = excluded.language
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(&record.user_id)
            .bind(&record.token)
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .bind(&record.device.user_agent)
            .bind(&record.device.platform)
            .bind(&record.device.language)
            .fetch_one(self.db_client.pool())
            .await
            .map_err(|e| {
                error!("Failed to upsert token record: {}", e);
                DbError::QueryError(e.to_string())
            })?;

        row_to_record(&row)
    }

    async fn remove_record(&self, user_id: &str, token: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM fcm_tokens WHERE user_id = ?1 AND token = ?2")
            .bind(user_id)
            .bind(token)
            .execute(self.db_client.pool())
            .await
            .map_err(|e| {
                error!("Failed to delete token record: {}", e);
                DbError::QueryError(e.to_string())
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_record(&self, user_id: &str, token: &str) -> Result<Option<TokenRecord>, DbError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM fcm_tokens WHERE user_id = ?1 AND token = ?2");
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(token)
            .fetch_optional(self.db_client.pool())
            .await
            .map_err(|e| DbError::QueryError(e.to_string()))?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_records_by_user(&self, user_id: &str) -> Result<Vec<TokenRecord>, DbError> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM fcm_tokens WHERE user_id = ?1 ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(self.db_client.pool())
            .await
            .map_err(|e| DbError::QueryError(e.to_string()))?;

        rows.iter().map(row_to_record).collect()
    }
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, DbError> {
    let raw: String = row
        .try_get(column)
        .map_err(|e| DbError::RowError(e.to_string()))?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::RowError(format!("{column}: {e}")))
}

fn row_to_record(row: &SqliteRow) -> Result<TokenRecord, DbError> {
    let text = |column: &str| -> Result<String, DbError> {
        row.try_get(column)
            .map_err(|e| DbError::RowError(e.to_string()))
    };

    Ok(TokenRecord {
        token: text("token")?,
        user_id: text("user_id")?,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
        device: DeviceDescriptor {
            user_agent: text("user_agent")?,
            platform: text("platform")?,
            language: text("language")?,
        },
    })
}

impl TokenStore for SqlTokenStore {
    fn upsert<'a>(&'a self, record: TokenRecord) -> BoxFuture<'a, TokenRecord, StoreError> {
        Box::pin(async move { self.upsert_record(record).await.map_err(StoreError::from) })
    }

    fn remove<'a>(&'a self, user_id: &'a str, token: &'a str) -> BoxFuture<'a, bool, StoreError> {
        Box::pin(async move { self.remove_record(user_id, token).await.map_err(StoreError::from) })
    }

    fn find<'a>(
        &'a self,
        user_id: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Option<TokenRecord>, StoreError> {
        Box::pin(async move { self.find_record(user_id, token).await.map_err(StoreError::from) })
    }

    fn find_by_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Vec<TokenRecord>, StoreError> {
        Box::pin(async move { self.find_records_by_user(user_id).await.map_err(StoreError::from) })
    }

    fn change_feed(&self) -> ChangeFeed {
        ChangeFeed::Poll(self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use classpush_common::TokenValue;

    async fn store() -> SqlTokenStore {
        let client = DbClient::from_url("sqlite::memory:").await.unwrap();
        let store = SqlTokenStore::new(client, Duration::from_millis(50));
        store.init_schema().await.unwrap();
        store
    }

    fn record(user_id: &str, token: &str) -> TokenRecord {
        TokenRecord::new(
            user_id,
            &TokenValue::new(token).unwrap(),
            DeviceDescriptor {
                user_agent: "test-agent".to_string(),
                platform: "linux-x86_64".to_string(),
                language: "de-CH".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_upsert_then_find() {
        let store = store().await;
        let stored = store.upsert(record("u1", "tok-a")).await.unwrap();
        assert_eq!(stored.token, "tok-a");

        let found = store.find("u1", "tok-a").await.unwrap().unwrap();
        assert_eq!(found.user_id, "u1");
        assert_eq!(found.device.language, "de-CH");
        assert!(store.find("u2", "tok-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_keeps_created_at() {
        let store = store().await;
        let mut first = record("u1", "tok-a");
        first.created_at -= ChronoDuration::days(2);
        first.updated_at -= ChronoDuration::days(2);
        let first = store.upsert(first).await.unwrap();

        let second = store.upsert(record("u1", "tok-a")).await.unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(store.find_by_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_user_may_own_many_tokens() {
        let store = store().await;
        store.upsert(record("u1", "tok-a")).await.unwrap();
        store.upsert(record("u1", "tok-b")).await.unwrap();
        store.upsert(record("u2", "tok-c")).await.unwrap();

        let tokens: Vec<String> = store
            .find_by_user("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.token)
            .collect();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains(&"tok-a".to_string()));
        assert!(tokens.contains(&"tok-b".to_string()));
    }

    #[tokio::test]
    async fn test_remove_reports_presence() {
        let store = store().await;
        store.upsert(record("u1", "tok-a")).await.unwrap();

        assert!(store.remove("u1", "tok-a").await.unwrap());
        assert!(!store.remove("u1", "tok-a").await.unwrap());
        assert!(store.find("u1", "tok-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_change_feed_polls_at_configured_interval() {
        let store = store().await;
        match store.change_feed() {
            ChangeFeed::Poll(interval) => assert_eq!(interval, Duration::from_millis(50)),
            other => panic!("expected a polling feed, got {:?}", other),
        }
    }
}
