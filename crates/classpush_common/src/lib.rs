// --- File: crates/classpush_common/src/lib.rs ---

// Declare modules within this crate
pub mod models;    // Token records and device metadata
pub mod error;     // Error handling
pub mod services;  // Store abstractions
pub mod logging;   // Logging utilities

// Re-export error types and utilities for easier access
pub use error::{ClasspushError, StoreError};

// Re-export the models most callers need
pub use models::{token_fingerprint, DeviceDescriptor, TokenRecord, TokenValue};

// Re-export store abstractions
pub use services::{BoxFuture, ChangeFeed, TokenStore};

// Re-export logging utilities for easier access
pub use logging::{init, init_with_level, log_error, log_result};

// This crate provides functionality shared by every classpush crate.
// It includes the token models, the remote store trait, error handling and logging setup.
