//! Data store abstraction
//!
//! Both flows talk to storage only through these traits. Two backends ship:
//! [`MemoryStore`] (the default, also used by tests) and [`PgStore`].

mod memory;
mod postgres;

pub use memory::{Fault, MemoryStore};
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::models::{Message, MessageHistory, Notification, PurgeReport, User};

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Open a transaction. Dropping it without `commit` rolls everything back.
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>>;

    async fn get_message(&self, id: Uuid) -> StorageResult<Option<Message>>;

    /// History entries ordered by `edited_at`, ties in insertion order.
    async fn message_history(&self, message_id: Uuid) -> StorageResult<Vec<MessageHistory>>;

    async fn unread_notifications(&self, user_id: Uuid) -> StorageResult<Vec<Notification>>;

    async fn mark_notification_read(&self, id: Uuid) -> StorageResult<()>;

    /// Page source over all messages ordered by id. No I/O until the first fetch.
    fn message_pages(&self) -> Box<dyn PageSource<Message>>;

    /// Page source over all users ordered by user_id. No I/O until the first fetch.
    fn user_pages(&self) -> Box<dyn PageSource<User>>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn get_user(&mut self, user_id: Uuid) -> StorageResult<Option<User>>;

    async fn insert_user(&mut self, user: &User) -> StorageResult<()>;

    /// Read a message and lock it until the transaction ends.
    async fn get_message_for_update(&mut self, id: Uuid) -> StorageResult<Option<Message>>;

    async fn insert_message(&mut self, message: &Message) -> StorageResult<()>;

    async fn update_message(&mut self, message: &Message) -> StorageResult<()>;

    async fn insert_history(&mut self, entry: &MessageHistory) -> StorageResult<()>;

    async fn insert_notification(&mut self, notification: &Notification) -> StorageResult<()>;

    /// Delete a user with their messages, the history of those messages and
    /// every notification that targets the user or one of the messages.
    async fn purge_user(&mut self, user_id: Uuid) -> StorageResult<PurgeReport>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// Forward-only reader over a stably ordered row set.
///
/// A source holds at most one cursor (connection or lease), opened on the
/// first fetch and released when the source is dropped.
#[async_trait]
pub trait PageSource<T>: Send {
    async fn fetch_page(&mut self, offset: i64, limit: i64) -> StorageResult<Vec<T>>;
}
