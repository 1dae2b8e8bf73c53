use async_trait::async_trait;
use chrono::Utc;
use query_cache::{CacheKey, QueryCache};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::edit_tracking::{on_after_create, on_before_update};
use crate::error::{MessagingResult, StorageError};
use crate::models::{
    validate_content, Message, MessageHistory, NewMessage, Notification, PurgeReport,
};
use crate::store::{DataStore, StoreTransaction};
use crate::streaming::{stream_chunks, ChunkStream};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedMessage {
    pub message: Message,
    pub notification: Notification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditedMessage {
    pub message: Message,
    /// `None` when the new content equals the stored content
    pub history: Option<MessageHistory>,
}

/// Hooks run inside the write transaction, after the built-in effects.
///
/// Returning an error aborts the write and rolls the transaction back.
#[async_trait]
pub trait MessageObserver: Send + Sync {
    async fn after_create(
        &self,
        _tx: &mut dyn StoreTransaction,
        _created: &CreatedMessage,
    ) -> MessagingResult<()> {
        Ok(())
    }

    async fn after_update(
        &self,
        _tx: &mut dyn StoreTransaction,
        _edited: &EditedMessage,
    ) -> MessagingResult<()> {
        Ok(())
    }
}

pub struct MessageService {
    store: Arc<dyn DataStore>,
    history_cache: QueryCache<Vec<MessageHistory>>,
    observers: Vec<Arc<dyn MessageObserver>>,
}

impl MessageService {
    pub fn new(store: Arc<dyn DataStore>, history_cache: QueryCache<Vec<MessageHistory>>) -> Self {
        Self {
            store,
            history_cache,
            observers: Vec::new(),
        }
    }

    /// Observers run in registration order.
    pub fn register_observer(&mut self, observer: Arc<dyn MessageObserver>) {
        self.observers.push(observer);
    }

    pub fn history_cache(&self) -> &QueryCache<Vec<MessageHistory>> {
        &self.history_cache
    }

    /// Store a new message together with the receiver's notification.
    pub async fn create_message(&self, new: NewMessage) -> MessagingResult<CreatedMessage> {
        new.validate()?;

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            created_at: now,
            edited: false,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_message(&message).await?;

        let sender_label = match tx.get_user(message.sender_id).await? {
            Some(sender) => sender.name,
            None => message.sender_id.to_string(),
        };
        let notification = on_after_create(&message, &sender_label, now)?;
        tx.insert_notification(&notification).await?;

        let created = CreatedMessage {
            message,
            notification,
        };
        for observer in &self.observers {
            observer.after_create(&mut *tx, &created).await?;
        }

        tx.commit().await?;

        info!(
            message_id = %created.message.id,
            receiver_id = %created.message.receiver_id,
            "Message created"
        );
        Ok(created)
    }

    /// Replace a message's content, recording the previous content.
    ///
    /// The read and the write happen in one transaction holding the row lock,
    /// so concurrent edits of the same message are applied one after another.
    pub async fn edit_message(
        &self,
        id: Uuid,
        new_content: impl Into<String>,
    ) -> MessagingResult<EditedMessage> {
        let new_content = new_content.into();
        validate_content(&new_content)?;

        let mut tx = self.store.begin().await?;
        let existing = tx
            .get_message_for_update(id)
            .await?
            .ok_or(StorageError::NotFound {
                entity: "message",
                id,
            })?;

        let incoming = Message {
            content: new_content,
            ..existing.clone()
        };
        let outcome = on_before_update(&existing, &incoming, Utc::now())?;

        if let Some(entry) = &outcome.history {
            tx.insert_history(entry).await?;
        }
        tx.update_message(&outcome.message).await?;

        let edited = EditedMessage {
            message: outcome.message,
            history: outcome.history,
        };
        for observer in &self.observers {
            observer.after_update(&mut *tx, &edited).await?;
        }

        tx.commit().await?;

        if edited.history.is_some() {
            self.history_cache
                .invalidate(&CacheKey::message_history(id))
                .await;
            info!(message_id = %id, "Message edited");
        } else {
            debug!(message_id = %id, "Message saved without content change");
        }
        Ok(edited)
    }

    /// Prior contents of a message, oldest first.
    pub async fn message_history(&self, message_id: Uuid) -> MessagingResult<Vec<MessageHistory>> {
        let store = self.store.clone();
        let entries = self
            .history_cache
            .get_or_try_insert_with(&CacheKey::message_history(message_id), || async move {
                store.message_history(message_id).await
            })
            .await?;
        Ok(entries)
    }

    /// Every content the message has had, oldest first, ending with the current one.
    pub async fn message_versions(&self, message_id: Uuid) -> MessagingResult<Vec<String>> {
        let current = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(StorageError::NotFound {
                entity: "message",
                id: message_id,
            })?;

        let mut versions: Vec<String> = self
            .message_history(message_id)
            .await?
            .into_iter()
            .map(|entry| entry.old_content)
            .collect();
        versions.push(current.content);
        Ok(versions)
    }

    pub async fn unread_notifications(&self, user_id: Uuid) -> MessagingResult<Vec<Notification>> {
        Ok(self.store.unread_notifications(user_id).await?)
    }

    pub async fn mark_notification_read(&self, notification_id: Uuid) -> MessagingResult<()> {
        self.store.mark_notification_read(notification_id).await?;
        debug!(notification_id = %notification_id, "Notification marked read");
        Ok(())
    }

    /// Delete a user and everything hanging off their messages.
    pub async fn delete_user(&self, user_id: Uuid) -> MessagingResult<PurgeReport> {
        let mut tx = self.store.begin().await?;
        let report = tx.purge_user(user_id).await?;
        tx.commit().await?;

        if report.messages_deleted > 0 {
            self.history_cache.invalidate_all();
        }
        if !report.user_deleted {
            warn!(user_id = %user_id, "Purge found no user row");
        }

        info!(
            user_id = %user_id,
            messages = report.messages_deleted,
            history = report.history_deleted,
            notifications = report.notifications_deleted,
            "User purged"
        );
        Ok(report)
    }

    /// All messages ordered by id, in chunks of `chunk_size`.
    pub fn stream_messages(&self, chunk_size: i64) -> MessagingResult<ChunkStream<Message>> {
        stream_chunks(self.store.message_pages(), chunk_size)
    }
}
