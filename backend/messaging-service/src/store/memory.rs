//! In-memory data store
//!
//! Transactions take an exclusive lock on the whole store and work on a
//! private copy of the tables; `commit` publishes the copy, dropping the
//! transaction discards it. Reads made through [`DataStore`] methods wait for
//! any open transaction, so a task holding a transaction must use the
//! transaction's own methods.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{DataStore, PageSource, StoreTransaction};
use crate::error::{StorageError, StorageResult};
use crate::models::{Message, MessageHistory, Notification, PurgeReport, User};

/// Failure points that can be switched on to exercise error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    InsertHistory,
    InsertNotification,
    Commit,
    /// Every page fetch after the cursor has served this many pages fails
    FetchPage { after_pages: usize },
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<Uuid, User>,
    messages: BTreeMap<Uuid, Message>,
    history: Vec<MessageHistory>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
struct Shared {
    tables: Arc<AsyncMutex<Tables>>,
    faults: Mutex<HashSet<Fault>>,
    begin_failures: AtomicUsize,
    open_cursors: AtomicUsize,
    page_fetches: AtomicUsize,
}

impl Shared {
    fn check(&self, fault: Fault) -> StorageResult<()> {
        if self.faults.lock().contains(&fault) {
            return Err(StorageError::Unavailable(format!("injected fault: {:?}", fault)));
        }
        Ok(())
    }

    fn check_fetch(&self, pages_served: usize) -> StorageResult<()> {
        let failing = self.faults.lock().iter().any(|f| {
            matches!(f, Fault::FetchPage { after_pages } if pages_served >= *after_pages)
        });
        if failing {
            return Err(StorageError::Unavailable(
                "injected fault: page fetch".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cheap to clone; clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_fault(&self, fault: Fault) {
        self.shared.faults.lock().insert(fault);
    }

    pub fn clear_faults(&self) {
        self.shared.faults.lock().clear();
        self.shared.begin_failures.store(0, Ordering::SeqCst);
    }

    /// Make the next `times` calls to `begin` fail with a transient error.
    pub fn fail_next_begins(&self, times: usize) {
        self.shared.begin_failures.store(times, Ordering::SeqCst);
    }

    /// Cursors currently held by live page sources.
    pub fn open_cursors(&self) -> usize {
        self.shared.open_cursors.load(Ordering::SeqCst)
    }

    /// Total page fetches attempted since the store was created.
    pub fn page_fetches(&self) -> usize {
        self.shared.page_fetches.load(Ordering::SeqCst)
    }

    pub async fn message_count(&self) -> usize {
        self.shared.tables.lock().await.messages.len()
    }

    pub async fn history_count(&self) -> usize {
        self.shared.tables.lock().await.history.len()
    }

    pub async fn notification_count(&self) -> usize {
        self.shared.tables.lock().await.notifications.len()
    }

    pub async fn user_count(&self) -> usize {
        self.shared.tables.lock().await.users.len()
    }

    fn pages<T>(&self, select: fn(&Tables, usize, usize) -> Vec<T>) -> MemoryPageSource<T> {
        MemoryPageSource {
            shared: self.shared.clone(),
            select,
            leased: false,
            pages_served: 0,
        }
    }
}

fn page_of<'a, T: Clone + 'a>(
    rows: impl Iterator<Item = &'a T>,
    offset: usize,
    limit: usize,
) -> Vec<T> {
    rows.skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        let refused = self
            .shared
            .begin_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StorageError::Unavailable(
                "injected fault: begin transaction".to_string(),
            ));
        }

        let guard = self.shared.tables.clone().lock_owned().await;
        let working = guard.clone();
        debug!("Memory transaction started");

        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            shared: self.shared.clone(),
            committed: false,
        }))
    }

    async fn get_message(&self, id: Uuid) -> StorageResult<Option<Message>> {
        Ok(self.shared.tables.lock().await.messages.get(&id).cloned())
    }

    async fn message_history(&self, message_id: Uuid) -> StorageResult<Vec<MessageHistory>> {
        let tables = self.shared.tables.lock().await;
        let mut entries: Vec<MessageHistory> = tables
            .history
            .iter()
            .filter(|h| h.message_id == message_id)
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps
        entries.sort_by_key(|h| h.edited_at);
        Ok(entries)
    }

    async fn unread_notifications(&self, user_id: Uuid) -> StorageResult<Vec<Notification>> {
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(&self, id: Uuid) -> StorageResult<()> {
        let mut tables = self.shared.tables.lock().await;
        match tables.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.is_read = true;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "notification",
                id,
            }),
        }
    }

    fn message_pages(&self) -> Box<dyn PageSource<Message>> {
        Box::new(self.pages(|t: &Tables, offset, limit| page_of(t.messages.values(), offset, limit)))
    }

    fn user_pages(&self) -> Box<dyn PageSource<User>> {
        Box::new(self.pages(|t: &Tables, offset, limit| page_of(t.users.values(), offset, limit)))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    shared: Arc<Shared>,
    committed: bool,
}

impl MemoryTransaction {
    fn require_message(&self, id: Uuid) -> StorageResult<()> {
        if self.working.messages.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::NotFound {
                entity: "message",
                id,
            })
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_user(&mut self, user_id: Uuid) -> StorageResult<Option<User>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn insert_user(&mut self, user: &User) -> StorageResult<()> {
        self.working.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn get_message_for_update(&mut self, id: Uuid) -> StorageResult<Option<Message>> {
        Ok(self.working.messages.get(&id).cloned())
    }

    async fn insert_message(&mut self, message: &Message) -> StorageResult<()> {
        self.working.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn update_message(&mut self, message: &Message) -> StorageResult<()> {
        self.require_message(message.id)?;
        self.working.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn insert_history(&mut self, entry: &MessageHistory) -> StorageResult<()> {
        self.shared.check(Fault::InsertHistory)?;
        self.require_message(entry.message_id)?;
        self.working.history.push(entry.clone());
        Ok(())
    }

    async fn insert_notification(&mut self, notification: &Notification) -> StorageResult<()> {
        self.shared.check(Fault::InsertNotification)?;
        self.require_message(notification.message_id)?;
        self.working.notifications.push(notification.clone());
        Ok(())
    }

    async fn purge_user(&mut self, user_id: Uuid) -> StorageResult<PurgeReport> {
        let tables = &mut self.working;

        let doomed: HashSet<Uuid> = tables
            .messages
            .values()
            .filter(|m| m.sender_id == user_id || m.receiver_id == user_id)
            .map(|m| m.id)
            .collect();

        let notifications_before = tables.notifications.len();
        tables
            .notifications
            .retain(|n| n.user_id != user_id && !doomed.contains(&n.message_id));

        let history_before = tables.history.len();
        tables.history.retain(|h| !doomed.contains(&h.message_id));

        tables.messages.retain(|id, _| !doomed.contains(id));

        Ok(PurgeReport {
            user_deleted: tables.users.remove(&user_id).is_some(),
            messages_deleted: doomed.len() as u64,
            history_deleted: (history_before - tables.history.len()) as u64,
            notifications_deleted: (notifications_before - tables.notifications.len()) as u64,
        })
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut this = self;
        this.shared.check(Fault::Commit)?;
        *this.guard = std::mem::take(&mut this.working);
        this.committed = true;
        debug!("Memory transaction committed");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.committed {
            debug!("Memory transaction rolled back");
        }
    }
}

struct MemoryPageSource<T> {
    shared: Arc<Shared>,
    select: fn(&Tables, usize, usize) -> Vec<T>,
    leased: bool,
    pages_served: usize,
}

#[async_trait]
impl<T> PageSource<T> for MemoryPageSource<T>
where
    T: Send + 'static,
{
    async fn fetch_page(&mut self, offset: i64, limit: i64) -> StorageResult<Vec<T>> {
        if !self.leased {
            self.shared.open_cursors.fetch_add(1, Ordering::SeqCst);
            self.leased = true;
            debug!("Memory cursor opened");
        }
        self.shared.page_fetches.fetch_add(1, Ordering::SeqCst);
        self.shared.check_fetch(self.pages_served)?;

        let tables = self.shared.tables.lock().await;
        let page = (self.select)(&*tables, offset.max(0) as usize, limit.max(0) as usize);
        self.pages_served += 1;
        Ok(page)
    }
}

impl<T> Drop for MemoryPageSource<T> {
    fn drop(&mut self) {
        if self.leased {
            self.shared.open_cursors.fetch_sub(1, Ordering::SeqCst);
            debug!(pages = self.pages_served, "Memory cursor released");
        }
    }
}
