//! Firestore token store
//!
//! This module provides a [`TokenStore`] backed by the Cloud Firestore REST API (v1).
//! Each token is a document at `users/{userId}/fcmTokens/{token}` whose fields follow
//! the registry schema `{token, userId, createdAt, updatedAt, deviceInfo}`.
//!
//! Firestore REST cannot push changes, so existence watchers poll it.

use crate::auth::AccessTokenSource;
use chrono::{DateTime, Utc};
use classpush_common::{
    log_error, token_fingerprint, BoxFuture, ChangeFeed, DeviceDescriptor, StoreError,
    TokenRecord, TokenStore,
};
use reqwest::{header, Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default REST endpoint for Cloud Firestore
pub const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

const USERS_COLLECTION: &str = "users";
const TOKENS_COLLECTION: &str = "fcmTokens";
const PAGE_SIZE: &str = "300";

/// Errors that can occur when interacting with Firebase
#[derive(Error, Debug)]
pub enum FirebaseError {
    /// Error during authentication with Firebase
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Error during HTTP request to Firebase API
    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    /// Missing required configuration
    #[error("Missing configuration: {0}")]
    ConfigError(String),

    /// Error returned by the Firebase API
    #[error("Firebase API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// A document did not have the expected shape
    #[error("Unexpected document: {0}")]
    DocumentError(String),

    /// Error from another token store backend
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}

impl From<FirebaseError> for StoreError {
    fn from(err: FirebaseError) -> Self {
        match err {
            FirebaseError::AuthError(message) => StoreError::Unauthorized(message),
            FirebaseError::ApiError { status, message } if status == 401 || status == 403 => {
                StoreError::Unauthorized(message)
            }
            FirebaseError::ApiError { status, message } => {
                StoreError::Rejected(format!("{}: {}", status, message))
            }
            FirebaseError::DocumentError(message) => StoreError::Malformed(message),
            FirebaseError::StoreError(inner) => inner,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Token store backed by Cloud Firestore documents.
pub struct FirestoreTokenStore {
    client: Client,
    base_url: Url,
    project_id: String,
    database_id: String,
    auth: Arc<dyn AccessTokenSource>,
    poll_interval: Duration,
}

impl FirestoreTokenStore {
    /// Creates a new Firestore token store
    ///
    /// # Arguments
    ///
    /// * `base_url` - REST endpoint, [`FIRESTORE_BASE_URL`] or an emulator address
    /// * `project_id` - The Firebase project
    /// * `database_id` - The Firestore database, usually `(default)`
    /// * `auth` - Source of bearer tokens
    /// * `poll_interval` - Interval at which existence watchers re-read documents
    pub fn new(
        base_url: &str,
        project_id: &str,
        database_id: &str,
        auth: Arc<dyn AccessTokenSource>,
        poll_interval: Duration,
    ) -> Result<Self, FirebaseError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FirebaseError::ConfigError(format!("invalid Firestore URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(FirebaseError::ConfigError(format!(
                "Firestore URL cannot be a base: {}",
                base_url
            )));
        }
        if project_id.is_empty() {
            return Err(FirebaseError::ConfigError(
                "Missing project_id in Firestore config".to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            project_id: project_id.to_string(),
            database_id: database_id.to_string(),
            auth,
            poll_interval,
        })
    }

    /// `projects/{p}/databases/{d}/documents/users/{u}/fcmTokens[/{t}]`, with each
    /// segment percent-encoded.
    fn documents_url(&self, user_id: &str, token: Option<&str>) -> Result<Url, FirebaseError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                FirebaseError::ConfigError("Firestore URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty().extend([
                "projects",
                self.project_id.as_str(),
                "databases",
                self.database_id.as_str(),
                "documents",
                USERS_COLLECTION,
                user_id,
                TOKENS_COLLECTION,
            ]);
            if let Some(token) = token {
                segments.push(token);
            }
        }
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, FirebaseError> {
        let bearer = self.auth.access_token().await?;
        Ok(self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", bearer)))
    }

    async fn api_error(response: reqwest::Response) -> FirebaseError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        let err = FirebaseError::ApiError { status, message };
        log_error(&err, "Firestore request failed");
        err
    }

    async fn get_document(&self, user_id: &str, token: &str) -> Result<Option<TokenRecord>, FirebaseError> {
        let url = self.documents_url(user_id, Some(token))?;
        let response = self.request(Method::GET, url).await?.send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let document: Value = response.json().await?;
                decode_document(&document).map(Some)
            }
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn put_document(&self, record: TokenRecord) -> Result<TokenRecord, FirebaseError> {
        debug!(
            user_id = %record.user_id,
            token = %token_fingerprint(&record.token),
            "Writing Firestore token document"
        );

        // Firestore has no server-side merge for a full document write, so read first
        let existing = self.get_document(&record.user_id, &record.token).await?;
        let record = record.merged_over(existing.as_ref());

        let url = self.documents_url(&record.user_id, Some(&record.token))?;
        let response = self
            .request(Method::PATCH, url)
            .await?
            .json(&encode_document(&record))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let document: Value = response.json().await?;
        decode_document(&document)
    }

    async fn delete_document(&self, user_id: &str, token: &str) -> Result<bool, FirebaseError> {
        let mut url = self.documents_url(user_id, Some(token))?;
        // Makes Firestore answer 404 instead of silently deleting nothing
        url.query_pairs_mut()
            .append_pair("currentDocument.exists", "true");

        let response = self.request(Method::DELETE, url).await?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<TokenRecord>, FirebaseError> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.documents_url(user_id, None)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", PAGE_SIZE);
                if let Some(page_token) = &page_token {
                    query.append_pair("pageToken", page_token);
                }
            }

            let response = self.request(Method::GET, url).await?.send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                break;
            }
            if !response.status().is_success() {
                return Err(Self::api_error(response).await);
            }

            let page: Value = response.json().await?;
            if let Some(documents) = page.get("documents").and_then(Value::as_array) {
                for document in documents {
                    records.push(decode_document(document)?);
                }
            }

            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        Ok(records)
    }
}

impl TokenStore for FirestoreTokenStore {
    fn upsert<'a>(&'a self, record: TokenRecord) -> BoxFuture<'a, TokenRecord, StoreError> {
        Box::pin(async move { self.put_document(record).await.map_err(StoreError::from) })
    }

    fn remove<'a>(&'a self, user_id: &'a str, token: &'a str) -> BoxFuture<'a, bool, StoreError> {
        Box::pin(async move { self.delete_document(user_id, token).await.map_err(StoreError::from) })
    }

    fn find<'a>(
        &'a self,
        user_id: &'a str,
        token: &'a str,
    ) -> BoxFuture<'a, Option<TokenRecord>, StoreError> {
        Box::pin(async move { self.get_document(user_id, token).await.map_err(StoreError::from) })
    }

    fn find_by_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Vec<TokenRecord>, StoreError> {
        Box::pin(async move { self.list_documents(user_id).await.map_err(StoreError::from) })
    }

    fn change_feed(&self) -> ChangeFeed {
        ChangeFeed::Poll(self.poll_interval)
    }
}

fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

fn timestamp_value(value: &DateTime<Utc>) -> Value {
    json!({ "timestampValue": value.to_rfc3339() })
}

/// Encode a record as a Firestore document body.
pub fn encode_document(record: &TokenRecord) -> Value {
    json!({
        "fields": {
            "token": string_value(&record.token),
            "userId": string_value(&record.user_id),
            "createdAt": timestamp_value(&record.created_at),
            "updatedAt": timestamp_value(&record.updated_at),
            "deviceInfo": {
                "mapValue": {
                    "fields": {
                        "userAgent": string_value(&record.device.user_agent),
                        "platform": string_value(&record.device.platform),
                        "language": string_value(&record.device.language),
                    }
                }
            }
        }
    })
}

fn field<'v>(fields: &'v Map<String, Value>, name: &str) -> Result<&'v Value, FirebaseError> {
    fields
        .get(name)
        .ok_or_else(|| FirebaseError::DocumentError(format!("missing field {}", name)))
}

fn read_string(fields: &Map<String, Value>, name: &str) -> Result<String, FirebaseError> {
    field(fields, name)?
        .get("stringValue")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FirebaseError::DocumentError(format!("{} is not a string", name)))
}

// Missing device fields read as empty: they are descriptive only
fn read_optional_string(fields: &Map<String, Value>, name: &str) -> String {
    read_string(fields, name).unwrap_or_default()
}

fn read_timestamp(fields: &Map<String, Value>, name: &str) -> Result<DateTime<Utc>, FirebaseError> {
    let raw = field(fields, name)?
        .get("timestampValue")
        .and_then(Value::as_str)
        .ok_or_else(|| FirebaseError::DocumentError(format!("{} is not a timestamp", name)))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| FirebaseError::DocumentError(format!("{}: {}", name, e)))
}

/// Decode a Firestore document into a record.
pub fn decode_document(document: &Value) -> Result<TokenRecord, FirebaseError> {
    let fields = document
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| FirebaseError::DocumentError("document has no fields".to_string()))?;

    let empty = Map::new();
    let device_fields = fields
        .get("deviceInfo")
        .and_then(|v| v.get("mapValue"))
        .and_then(|v| v.get("fields"))
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    Ok(TokenRecord {
        token: read_string(fields, "token")?,
        user_id: read_string(fields, "userId")?,
        created_at: read_timestamp(fields, "createdAt")?,
        updated_at: read_timestamp(fields, "updatedAt")?,
        device: DeviceDescriptor {
            user_agent: read_optional_string(device_fields, "userAgent"),
            platform: read_optional_string(device_fields, "platform"),
            language: read_optional_string(device_fields, "language"),
        },
    })
}
