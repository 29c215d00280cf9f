//! Foreground messages
//!
//! Push messages that arrive while the app is open are handed to the host as
//! raw JSON payloads (`{notification: {title, body}, data: {...}}`). This
//! module turns them into something the host can show as a toast.

use classpush_common::ClasspushError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Title used when a payload carries none.
pub const DEFAULT_TITLE: &str = "Classpush";
/// Body used when a payload carries none.
pub const DEFAULT_BODY: &str = "You have a new notification";

const ARENA_PATH: &str = "/arena";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    ChallengeInvite,
    ChallengeAccepted,
    General(String),
}

impl MessageKind {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "arena_challenge_invite" => MessageKind::ChallengeInvite,
            "arena_challenge_accepted" => MessageKind::ChallengeAccepted,
            other => MessageKind::General(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::ChallengeInvite => "arena_challenge_invite",
            MessageKind::ChallengeAccepted => "arena_challenge_accepted",
            MessageKind::General(kind) => kind,
        }
    }
}

/// Buttons a toast may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    Accept,
    Start,
    View,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundMessage {
    pub title: String,
    pub body: String,
    pub kind: MessageKind,
    /// Where a click on the notification should lead.
    pub click_url: Option<String>,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    notification: Option<NotificationPart>,
    #[serde(default)]
    data: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPart {
    title: Option<String>,
    body: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ForegroundMessage {
    /// Parse a foreground payload. Missing parts fall back to defaults; only a
    /// payload that is not a JSON object (or has a malformed `data` map) fails.
    pub fn from_payload(payload: &Value) -> Result<Self, ClasspushError> {
        let payload = Payload::deserialize(payload)?;
        let notification = payload.notification.unwrap_or_default();

        // Push data values are strings on the wire; anything else is kept as JSON text
        let data: BTreeMap<String, String> = payload
            .data
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect();

        let kind = data
            .get("type")
            .filter(|kind| !kind.is_empty())
            .map(|kind| MessageKind::from_type(kind))
            .unwrap_or_else(|| MessageKind::General("general".to_string()));
        let click_url = data
            .get("url")
            .or_else(|| data.get("link"))
            .filter(|url| !url.is_empty())
            .cloned();

        let message = Self {
            title: non_empty(notification.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: non_empty(notification.body).unwrap_or_else(|| DEFAULT_BODY.to_string()),
            kind,
            click_url,
            data,
        };
        debug!(kind = message.kind.as_str(), "[push] Foreground message received");
        Ok(message)
    }

    pub fn challenge_id(&self) -> Option<&str> {
        self.data.get("challengeId").map(String::as_str)
    }

    /// In-app path for a toast action. `None` when the action needs a
    /// challenge id the message does not carry.
    pub fn action_path(&self, action: MessageAction) -> Option<String> {
        match action {
            MessageAction::Accept => self
                .challenge_id()
                .map(|id| format!("{}?accept={}", ARENA_PATH, id)),
            MessageAction::Start => self
                .challenge_id()
                .map(|id| format!("{}?start={}", ARENA_PATH, id)),
            MessageAction::View => Some(ARENA_PATH.to_string()),
        }
    }

    /// Actions a toast for this message should offer.
    pub fn actions(&self) -> &'static [MessageAction] {
        match self.kind {
            MessageKind::ChallengeInvite => &[MessageAction::Accept, MessageAction::View],
            MessageKind::ChallengeAccepted => &[MessageAction::Start],
            MessageKind::General(_) => &[],
        }
    }
}
