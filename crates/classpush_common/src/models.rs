// --- File: crates/classpush_common/src/models.rs ---
//! Data models shared between the coordinator and the token store backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque device token issued by the push service for an (application, device) pair.
///
/// The value is never parsed. `Debug` prints a fingerprint instead of the raw token
/// so tokens do not leak into logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenValue(String);

impl TokenValue {
    /// Wrap a raw token. Returns `None` for empty or whitespace-only values.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Short, stable, non-reversible identifier for log lines.
    pub fn fingerprint(&self) -> String {
        token_fingerprint(&self.0)
    }
}

impl fmt::Debug for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenValue({})", self.fingerprint())
    }
}

impl AsRef<str> for TokenValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// First 12 hex chars of the SHA-256 of a token.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Descriptive metadata about the device that owns a token. Never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub user_agent: String,
    pub platform: String,
    pub language: String,
}

impl DeviceDescriptor {
    /// Build a descriptor for the current host process.
    ///
    /// The user agent is `<crate>/<version> (<os>)`, the platform is `<os>-<arch>`
    /// and the language is taken from `LC_ALL`/`LANG`, falling back to `en-US`.
    pub fn detect() -> Self {
        let os = std::env::consts::OS;
        let language = ["LC_ALL", "LANG"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find_map(|raw| normalize_locale(&raw))
            .unwrap_or_else(|| "en-US".to_string());

        Self {
            user_agent: format!(
                "{}/{} ({})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                os
            ),
            platform: format!("{}-{}", os, std::env::consts::ARCH),
            language,
        }
    }
}

// "de_CH.UTF-8" -> "de-CH"; "C" and "POSIX" carry no language.
fn normalize_locale(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

/// A token record held by the remote registry, keyed by `(user_id, token)`.
///
/// Serialized with the field names used by the remote schema:
/// `{token, userId, createdAt, updatedAt, deviceInfo}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "deviceInfo")]
    pub device: DeviceDescriptor,
}

impl TokenRecord {
    /// A fresh record stamped with the current time.
    pub fn new(user_id: &str, token: &TokenValue, device: DeviceDescriptor) -> Self {
        let now = Utc::now();
        Self {
            token: token.as_str().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
            device,
        }
    }

    /// Merge `self` (the incoming write) over an existing record:
    /// keeps the original creation time, takes everything else from the write.
    pub fn merged_over(mut self, existing: Option<&TokenRecord>) -> Self {
        if let Some(existing) = existing {
            self.created_at = existing.created_at.min(self.created_at);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_value_rejects_blank() {
        assert!(TokenValue::new("").is_none());
        assert!(TokenValue::new("   ").is_none());
        assert_eq!(TokenValue::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_debug_does_not_print_raw_token() {
        let token = TokenValue::new("very-secret-device-token").unwrap();
        let printed = format!("{:?}", token);
        assert!(!printed.contains("very-secret-device-token"));
        assert!(printed.contains(&token.fingerprint()));
        assert_eq!(token.fingerprint().len(), 12);
    }

    #[test]
    fn test_normalize_locale() {
        assert_eq!(normalize_locale("de_CH.UTF-8"), Some("de-CH".to_string()));
        assert_eq!(normalize_locale("en_US@euro"), Some("en-US".to_string()));
        assert_eq!(normalize_locale("C"), None);
        assert_eq!(normalize_locale(""), None);
    }

    #[test]
    fn test_record_serializes_remote_schema() {
        let token = TokenValue::new("tok-1").unwrap();
        let record = TokenRecord::new(
            "user-1",
            &token,
            DeviceDescriptor {
                user_agent: "ua".to_string(),
                platform: "linux-x86_64".to_string(),
                language: "en-US".to_string(),
            },
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["token"], "tok-1");
        assert_eq!(json["userId"], "user-1");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["deviceInfo"]["userAgent"], "ua");
        assert_eq!(json["deviceInfo"]["platform"], "linux-x86_64");
        assert_eq!(json["deviceInfo"]["language"], "en-US");
    }

    #[test]
    fn test_merge_keeps_original_creation_time() {
        let token = TokenValue::new("tok-1").unwrap();
        let device = DeviceDescriptor::detect();
        let mut existing = TokenRecord::new("user-1", &token, device.clone());
        existing.created_at -= Duration::days(3);
        existing.updated_at -= Duration::days(3);

        let incoming = TokenRecord::new("user-1", &token, device);
        let merged = incoming.clone().merged_over(Some(&existing));

        assert_eq!(merged.created_at, existing.created_at);
        assert_eq!(merged.updated_at, incoming.updated_at);
    }
}
