//! Repository modules for database access

pub mod token_store_sql;

pub use token_store_sql::SqlTokenStore;
