//! Wire protocol for the chat service.
//!
//! Messages travel as JSON text frames over a WebSocket opened on
//! `/chat/{roomId}`. The room is selected by the endpoint path, never by
//! the payload.

pub mod message;
pub mod validation;

pub use message::{room_path, ChatMessage, MessageType, ResponseStatus, ServerResponse};
pub use validation::{validate, ValidationError};
