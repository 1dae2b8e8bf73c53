use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MessagingError, MessagingResult};

/// Upper bound on message content, counted in characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
}

/// Input for creating a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

impl NewMessage {
    pub fn new(sender_id: Uuid, receiver_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: content.into(),
        }
    }

    pub fn validate(&self) -> MessagingResult<()> {
        if self.sender_id.is_nil() {
            return Err(MessagingError::invalid("sender reference is missing"));
        }
        if self.receiver_id.is_nil() {
            return Err(MessagingError::invalid("receiver reference is missing"));
        }
        validate_content(&self.content)
    }
}

pub fn validate_content(content: &str) -> MessagingResult<()> {
    if content.is_empty() {
        return Err(MessagingError::invalid("message content cannot be empty"));
    }
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(MessagingError::invalid(format!(
            "message content is {} characters, limit is {}",
            chars, MAX_CONTENT_CHARS
        )));
    }
    Ok(())
}
