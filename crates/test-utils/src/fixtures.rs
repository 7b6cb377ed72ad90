//! Common test fixtures for chat load tests.

use chat_protocol::{ChatMessage, MessageType};
use chrono::Utc;

/// A message the service accepts.
pub fn valid_message(message_type: MessageType) -> ChatMessage {
    ChatMessage {
        user_id: "123".to_string(),
        username: "testuser".to_string(),
        message: "Hello!".to_string(),
        timestamp: Utc::now(),
        message_type,
    }
}

/// A message the service rejects (username too short).
pub fn invalid_message() -> ChatMessage {
    ChatMessage {
        username: "ab".to_string(),
        ..valid_message(MessageType::Text)
    }
}

/// Latency samples with a known nearest-rank distribution, in milliseconds.
///
/// median = 30, p95 = 50, p99 = 50
pub const LATENCY_SAMPLES_MS: [u64; 5] = [10, 20, 30, 40, 50];
