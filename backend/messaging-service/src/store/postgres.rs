//! PostgreSQL data store
//!
//! Every statement text is logged at debug level before it runs.

use async_trait::async_trait;
use db_pool::{acquire_scoped, ScopedConnection};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::marker::PhantomData;
use tracing::{debug, info};
use uuid::Uuid;

use super::{DataStore, PageSource, StoreTransaction};
use crate::error::{StorageError, StorageResult};
use crate::models::{Message, MessageHistory, Notification, PurgeReport, User};

const SELECT_MESSAGE: &str = r#"
    SELECT id, sender_id, receiver_id, content, created_at, edited
    FROM messages
    WHERE id = $1
"#;

const SELECT_MESSAGE_FOR_UPDATE: &str = r#"
    SELECT id, sender_id, receiver_id, content, created_at, edited
    FROM messages
    WHERE id = $1
    FOR UPDATE
"#;

const MESSAGE_PAGE: &str = r#"
    SELECT id, sender_id, receiver_id, content, created_at, edited
    FROM messages
    ORDER BY id
    LIMIT $1 OFFSET $2
"#;

const USER_PAGE: &str = r#"
    SELECT user_id, name, email, age
    FROM users
    ORDER BY user_id
    LIMIT $1 OFFSET $2
"#;

fn logged(sql: &'static str) -> &'static str {
    debug!(sql = %sql.trim(), "Executing query");
    sql
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    service: String,
}

impl PgStore {
    pub fn new(pool: PgPool, service: impl Into<String>) -> Self {
        Self {
            pool,
            service: service.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn pages<T>(&self, sql: &'static str) -> PgPageSource<T> {
        PgPageSource {
            pool: self.pool.clone(),
            service: self.service.clone(),
            sql,
            conn: None,
            _row: PhantomData,
        }
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        debug!(service = %self.service, "Transaction started");
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn get_message(&self, id: Uuid) -> StorageResult<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(logged(SELECT_MESSAGE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn message_history(&self, message_id: Uuid) -> StorageResult<Vec<MessageHistory>> {
        let entries = sqlx::query_as::<_, MessageHistory>(logged(
            r#"
            SELECT id, message_id, old_content, edited_at
            FROM message_history
            WHERE message_id = $1
            ORDER BY edited_at ASC, seq ASC
            "#,
        ))
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn unread_notifications(&self, user_id: Uuid) -> StorageResult<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(logged(
            r#"
            SELECT id, user_id, message_id, text, is_read, "timestamp"
            FROM notifications
            WHERE user_id = $1 AND is_read = FALSE
            ORDER BY "timestamp" ASC, seq ASC
            "#,
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }

    async fn mark_notification_read(&self, id: Uuid) -> StorageResult<()> {
        let result = sqlx::query(logged(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1",
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "notification",
                id,
            });
        }
        Ok(())
    }

    fn message_pages(&self) -> Box<dyn PageSource<Message>> {
        Box::new(self.pages::<Message>(MESSAGE_PAGE))
    }

    fn user_pages(&self) -> Box<dyn PageSource<User>> {
        Box::new(self.pages::<User>(USER_PAGE))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn get_user(&mut self, user_id: Uuid) -> StorageResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(logged(
            "SELECT user_id, name, email, age FROM users WHERE user_id = $1",
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(user)
    }

    async fn insert_user(&mut self, user: &User) -> StorageResult<()> {
        sqlx::query(logged(
            "INSERT INTO users (user_id, name, email, age) VALUES ($1, $2, $3, $4)",
        ))
        .bind(user.user_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.age)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_message_for_update(&mut self, id: Uuid) -> StorageResult<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(logged(SELECT_MESSAGE_FOR_UPDATE))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(message)
    }

    async fn insert_message(&mut self, message: &Message) -> StorageResult<()> {
        sqlx::query(logged(
            r#"
            INSERT INTO messages (id, sender_id, receiver_id, content, created_at, edited)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        ))
        .bind(message.id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.content)
        .bind(message.created_at)
        .bind(message.edited)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_message(&mut self, message: &Message) -> StorageResult<()> {
        let result = sqlx::query(logged(
            "UPDATE messages SET content = $2, edited = $3 WHERE id = $1",
        ))
        .bind(message.id)
        .bind(&message.content)
        .bind(message.edited)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "message",
                id: message.id,
            });
        }
        Ok(())
    }

    async fn insert_history(&mut self, entry: &MessageHistory) -> StorageResult<()> {
        sqlx::query(logged(
            r#"
            INSERT INTO message_history (id, message_id, old_content, edited_at)
            VALUES ($1, $2, $3, $4)
            "#,
        ))
        .bind(entry.id)
        .bind(entry.message_id)
        .bind(&entry.old_content)
        .bind(entry.edited_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_notification(&mut self, notification: &Notification) -> StorageResult<()> {
        sqlx::query(logged(
            r#"
            INSERT INTO notifications (id, user_id, message_id, text, is_read, "timestamp")
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        ))
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.message_id)
        .bind(&notification.text)
        .bind(notification.is_read)
        .bind(notification.timestamp)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn purge_user(&mut self, user_id: Uuid) -> StorageResult<PurgeReport> {
        let notifications = sqlx::query(logged(
            r#"
            DELETE FROM notifications
            WHERE user_id = $1
               OR message_id IN (
                   SELECT id FROM messages WHERE sender_id = $1 OR receiver_id = $1
               )
            "#,
        ))
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;

        let history = sqlx::query(logged(
            r#"
            DELETE FROM message_history
            WHERE message_id IN (
                SELECT id FROM messages WHERE sender_id = $1 OR receiver_id = $1
            )
            "#,
        ))
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;

        let messages = sqlx::query(logged(
            "DELETE FROM messages WHERE sender_id = $1 OR receiver_id = $1",
        ))
        .bind(user_id)
        .execute(&mut *self.tx)
        .await?;

        let user = sqlx::query(logged("DELETE FROM users WHERE user_id = $1"))
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(PurgeReport {
            user_deleted: user.rows_affected() > 0,
            messages_deleted: messages.rows_affected(),
            history_deleted: history.rows_affected(),
            notifications_deleted: notifications.rows_affected(),
        })
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await?;
        debug!("Transaction committed");
        Ok(())
    }
}

/// Offset pager that keeps one pooled connection for its whole life.
struct PgPageSource<T> {
    pool: PgPool,
    service: String,
    sql: &'static str,
    conn: Option<ScopedConnection>,
    _row: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T> PageSource<T> for PgPageSource<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
{
    async fn fetch_page(&mut self, offset: i64, limit: i64) -> StorageResult<Vec<T>> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let conn = acquire_scoped(&self.pool, &self.service).await?;
                info!(service = %self.service, "Cursor opened");
                conn
            }
        };
        let conn = self.conn.insert(conn);

        let rows = sqlx::query_as::<_, T>(logged(self.sql))
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut **conn)
            .await?;
        Ok(rows)
    }
}
