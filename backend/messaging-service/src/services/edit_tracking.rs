//! Edit tracking decisions
//!
//! Pure functions that decide what a message mutation produces. They never
//! touch storage; the write path in [`super::message_service`] persists their
//! output inside one transaction.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{MessagingError, MessagingResult};
use crate::models::{Message, MessageHistory, Notification};

/// Result of applying an update to a stored message.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// The message as it must be written back
    pub message: Message,
    /// Present only when the content changed
    pub history: Option<MessageHistory>,
}

/// Decide the effect of replacing `existing` with `incoming`.
///
/// Only `content` can change through an update: sender, receiver and
/// creation time are always taken from `existing`. A content change records
/// the previous content verbatim and marks the message as edited. An update
/// with identical content records nothing and leaves `edited` as stored.
pub fn on_before_update(
    existing: &Message,
    incoming: &Message,
    now: DateTime<Utc>,
) -> MessagingResult<EditOutcome> {
    if existing.id != incoming.id {
        return Err(MessagingError::invalid(format!(
            "update for message {} applied to message {}",
            incoming.id, existing.id
        )));
    }

    if existing.content == incoming.content {
        return Ok(EditOutcome {
            message: existing.clone(),
            history: None,
        });
    }

    let history = MessageHistory {
        id: Uuid::new_v4(),
        message_id: existing.id,
        old_content: existing.content.clone(),
        edited_at: now,
    };

    let message = Message {
        content: incoming.content.clone(),
        edited: true,
        ..existing.clone()
    };

    Ok(EditOutcome {
        message,
        history: Some(history),
    })
}

/// Build the notification owed to the receiver of a newly created message.
pub fn on_after_create(
    message: &Message,
    sender_label: &str,
    now: DateTime<Utc>,
) -> MessagingResult<Notification> {
    if message.receiver_id.is_nil() {
        return Err(MessagingError::invalid(format!(
            "message {} has no receiver",
            message.id
        )));
    }

    Ok(Notification {
        id: Uuid::new_v4(),
        user_id: message.receiver_id,
        message_id: message.id,
        text: format!("New message from {}", sender_label),
        is_read: false,
        timestamp: now,
    })
}
