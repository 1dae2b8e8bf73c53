use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    /// Recipient of the notification (the message receiver)
    pub user_id: Uuid,
    pub message_id: Uuid,
    pub text: String,
    pub is_read: bool,
    pub timestamp: DateTime<Utc>,
}
