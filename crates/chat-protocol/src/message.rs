//! Request and response messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of chat message, derived from the simulated user's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Join,
    Leave,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [MessageType::Join, MessageType::Text, MessageType::Leave];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::Join => "JOIN",
            MessageType::Leave => "LEAVE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user_id: String,
    pub username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
}

/// Application-level outcome reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// The service's reply to one [`ChatMessage`].
///
/// Echoed fields are optional on the way back: a reply to an unparseable
/// frame carries empty user fields and no usable message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_type: String,
    pub server_timestamp: DateTime<Utc>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerResponse {
    /// Successful echo of `message`.
    pub fn ok(message: &ChatMessage) -> Self {
        Self::echo(message, ResponseStatus::Ok, None)
    }

    /// Rejection of `message` with a reason.
    pub fn rejected(message: &ChatMessage, error: impl Into<String>) -> Self {
        Self::echo(message, ResponseStatus::Error, Some(error.into()))
    }

    /// Rejection of a frame that could not be decoded at all.
    pub fn invalid_frame(error: impl Into<String>) -> Self {
        Self {
            user_id: String::new(),
            username: String::new(),
            message: String::new(),
            timestamp: None,
            message_type: String::new(),
            server_timestamp: Utc::now(),
            status: ResponseStatus::Error,
            error: Some(error.into()),
        }
    }

    fn echo(message: &ChatMessage, status: ResponseStatus, error: Option<String>) -> Self {
        Self {
            user_id: message.user_id.clone(),
            username: message.username.clone(),
            message: message.message.clone(),
            timestamp: Some(message.timestamp),
            message_type: message.message_type.as_str().to_string(),
            server_timestamp: Utc::now(),
            status,
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Endpoint path for a room.
pub fn room_path(room_id: &str) -> String {
    format!("/chat/{}", room_id)
}
