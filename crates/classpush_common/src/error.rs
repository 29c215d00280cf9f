// --- File: crates/classpush_common/src/error.rs ---
use thiserror::Error;

/// The base error type for classpush.
///
/// Each crate can extend this by implementing From<SpecificError> for ClasspushError.
#[derive(Error, Debug)]
pub enum ClasspushError {
    /// Error occurred while parsing data
    #[error("Failed to parse data: {0}")]
    ParseError(String),

    /// Error occurred in a token store
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}

/// Errors raised by a [`crate::TokenStore`] backend.
///
/// Backends map their native errors (HTTP, SQL, ...) onto these variants so the
/// registry can report them without knowing which backend is in use.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or the transport failed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the credentials
    #[error("Store authentication failed: {0}")]
    Unauthorized(String),

    /// The backend answered, but with an error
    #[error("Store rejected request: {0}")]
    Rejected(String),

    /// The backend returned data that could not be decoded
    #[error("Store returned malformed data: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ClasspushError {
    fn from(err: serde_json::Error) -> Self {
        ClasspushError::ParseError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_is_parse_error() {
        let err: ClasspushError = serde_json::from_str::<u8>("not json").unwrap_err().into();
        assert!(matches!(err, ClasspushError::ParseError(_)));
    }

    #[test]
    fn test_store_error_converts() {
        let err: ClasspushError = StoreError::Unavailable("timeout".to_string()).into();
        assert!(matches!(err, ClasspushError::StoreError(StoreError::Unavailable(_))));
    }
}
