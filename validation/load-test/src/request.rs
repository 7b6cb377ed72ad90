//! Synthetic requests flowing from the generator to the workers.

use chat_protocol::{ChatMessage, MessageType};
use chrono::{DateTime, Utc};

/// One unit of synthetic work. Immutable once generated.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub user_id: u32,
    pub username: String,
    pub message: String,
    /// When the generator produced the request.
    pub timestamp: DateTime<Utc>,
    pub kind: MessageType,
    /// Room the request must be delivered to; selects the connection.
    pub room_id: String,
}

impl Request {
    /// Wire form of the request. The room travels in the endpoint path.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            user_id: self.user_id.to_string(),
            username: self.username.clone(),
            message: self.message.clone(),
            timestamp: self.timestamp,
            message_type: self.kind,
        }
    }
}
