//! Field rules the chat service enforces on incoming messages.

use thiserror::Error;

use crate::message::ChatMessage;

pub const MAX_USER_ID: u32 = 100_000;
const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;
const MESSAGE_LEN: std::ops::RangeInclusive<usize> = 1..=500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("userId must be between 1 and 100000")]
    UserId,

    #[error("username must be 3-20 alphanumeric characters")]
    Username,

    #[error("message must be 1-500 characters")]
    Message,
}

/// Check a message the way the service does before echoing it.
///
/// `messageType` needs no check here: an unknown type fails to deserialize.
pub fn validate(message: &ChatMessage) -> Result<(), ValidationError> {
    match message.user_id.parse::<u32>() {
        Ok(id) if (1..=MAX_USER_ID).contains(&id) => {}
        _ => return Err(ValidationError::UserId),
    }

    let username = &message.username;
    if !USERNAME_LEN.contains(&username.len())
        || !username.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ValidationError::Username);
    }

    // Length in bytes, not characters
    if !MESSAGE_LEN.contains(&message.message.len()) {
        return Err(ValidationError::Message);
    }

    Ok(())
}
