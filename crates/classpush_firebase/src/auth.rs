//! Authentication for the Firestore REST API
//!
//! This module provides access tokens for requests against Firestore. In
//! production the token comes from a service account key file via Google's
//! OAuth2 service; against the Firestore emulator a static token is enough.

use crate::client::FirebaseError;
use classpush_common::BoxFuture;
use std::path::Path;
use yup_oauth2::{read_service_account_key, ServiceAccountAuthenticator};

/// OAuth2 scope granting read/write access to Cloud Firestore
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Source of bearer tokens for Firestore requests.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> BoxFuture<'_, String, FirebaseError>;
}

/// Obtains tokens for a service account key file.
#[derive(Debug, Clone)]
pub struct ServiceAccountTokenSource {
    key_path: String,
}

impl ServiceAccountTokenSource {
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }
}

impl AccessTokenSource for ServiceAccountTokenSource {
    fn access_token(&self) -> BoxFuture<'_, String, FirebaseError> {
        Box::pin(get_firestore_auth_token(&self.key_path))
    }
}

/// A fixed token, e.g. `owner` for the Firestore emulator.
#[derive(Debug, Clone)]
pub struct StaticAccessToken(pub String);

impl AccessTokenSource for StaticAccessToken {
    fn access_token(&self) -> BoxFuture<'_, String, FirebaseError> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// Obtains an OAuth2 access token for Cloud Firestore
///
/// This function reads the service account key file at `key_path` and uses it
/// to authenticate with Google's OAuth2 service, requesting the datastore scope.
///
/// # Errors
///
/// This function will return an error if:
/// * The service account key file cannot be read
/// * Authentication with Google's OAuth2 service fails
/// * No token is returned from the authentication service
pub async fn get_firestore_auth_token(key_path: &str) -> Result<String, FirebaseError> {
    let sa_key = read_service_account_key(Path::new(key_path))
        .await
        .map_err(|e| FirebaseError::AuthError(format!("reading {}: {}", key_path, e)))?;

    let auth = ServiceAccountAuthenticator::builder(sa_key)
        .build()
        .await
        .map_err(|e| FirebaseError::AuthError(e.to_string()))?;

    let auth_token = auth
        .token(&[FIRESTORE_SCOPE])
        .await
        .map_err(|e| FirebaseError::AuthError(e.to_string()))?;

    match auth_token.token() {
        Some(token) => Ok(token.to_string()),
        None => Err(FirebaseError::AuthError("No token available".to_string())),
    }
}
