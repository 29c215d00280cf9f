//! Database integration for classpush
//!
//! This crate provides a SQLite-backed implementation of the remote token
//! registry store, using SQLx as the underlying database library.
//!
//! # Example
//!
//! ```rust,no_run
//! use classpush_db::{DbClient, SqlTokenStore};
//! use std::time::Duration;
//!
//! async fn setup_store() -> Result<SqlTokenStore, Box<dyn std::error::Error>> {
//!     let db_client = DbClient::from_url("sqlite://classpush.db").await?;
//!     let store = SqlTokenStore::new(db_client, Duration::from_secs(30));
//!     store.init_schema().await?;
//!     Ok(store)
//! }
//! ```

pub mod client;
pub mod error;
pub mod repositories;

// Re-export the client and the store for ease of use
pub use client::DbClient;
pub use error::DbError;
pub use repositories::SqlTokenStore;
