pub mod history;
pub mod message;
pub mod notification;
pub mod user;

pub use history::MessageHistory;
pub use message::{validate_content, Message, NewMessage, MAX_CONTENT_CHARS};
pub use notification::Notification;
pub use user::{NewUser, User};

use serde::{Deserialize, Serialize};

/// Rows removed by a user cascade delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub user_deleted: bool,
    pub messages_deleted: u64,
    pub history_deleted: u64,
    pub notifications_deleted: u64,
}
