//! User registration, seeding and streamed aggregates over the users table.
//!
//! Aggregates never load the whole table: they consume the chunked scan.

use futures::future;
use futures::stream::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::info;

use crate::error::{MessagingError, MessagingResult};
use crate::models::{NewUser, User};
use crate::store::DataStore;
use crate::streaming::{stream_chunks, stream_rows, ChunkStream, RowStream};

/// Parse a seed file: a JSON array of `{name, email, age}` objects.
pub fn parse_seed(json: &str) -> MessagingResult<Vec<NewUser>> {
    serde_json::from_str(json)
        .map_err(|e| MessagingError::invalid(format!("malformed seed data: {}", e)))
}

/// Parse a CSV seed file: a header row, then `name,email,age` by position.
pub fn parse_seed_csv(data: &str) -> MessagingResult<Vec<NewUser>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes())
        .deserialize::<(String, String, i32)>()
        .map(|record| -> MessagingResult<NewUser> {
            let (name, email, age) = record.map_err(|e| {
                MessagingError::invalid(format!("malformed seed data: {}", e))
            })?;
            Ok(NewUser { name, email, age })
        })
        .collect()
}

pub struct UserDirectory {
    store: Arc<dyn DataStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub async fn register_user(&self, new: NewUser) -> MessagingResult<User> {
        let mut users = self.seed_users(vec![new]).await?;
        users
            .pop()
            .ok_or_else(|| MessagingError::invalid("no user registered"))
    }

    /// Insert every user in one transaction; any invalid entry rejects the batch.
    pub async fn seed_users(&self, batch: Vec<NewUser>) -> MessagingResult<Vec<User>> {
        for new in &batch {
            new.validate()?;
        }

        let users: Vec<User> = batch.into_iter().map(NewUser::into_user).collect();

        let mut tx = self.store.begin().await?;
        for user in &users {
            tx.insert_user(user).await?;
        }
        tx.commit().await?;

        info!(count = users.len(), "Users seeded");
        Ok(users)
    }

    /// All users ordered by id, in chunks of `chunk_size`.
    pub fn stream_users(&self, chunk_size: i64) -> MessagingResult<ChunkStream<User>> {
        stream_chunks(self.store.user_pages(), chunk_size)
    }

    /// Users strictly older than `min_age`, read `chunk_size` rows at a time.
    pub fn users_over_age(&self, chunk_size: i64, min_age: i32) -> MessagingResult<RowStream<User>> {
        let rows = stream_rows(self.store.user_pages(), chunk_size)?
            .try_filter(move |user| future::ready(user.age > min_age));
        Ok(rows.boxed())
    }

    /// Mean age over all users, `None` when there are none.
    pub async fn average_age(&self, chunk_size: i64) -> MessagingResult<Option<f64>> {
        let (total, count) = stream_rows(self.store.user_pages(), chunk_size)?
            .try_fold((0i64, 0u64), |(total, count), user| {
                future::ready(Ok((total + i64::from(user.age), count + 1)))
            })
            .await?;

        Ok((count > 0).then(|| total as f64 / count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed_reads_array() {
        let users = parse_seed(
            r#"[{"name": "Ada", "email": "ada@example.com", "age": 36},
                {"name": "Alan", "email": "alan@example.com", "age": 41}]"#,
        )
        .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].age, 41);
    }

    #[test]
    fn test_parse_seed_csv_skips_header() {
        let users = parse_seed_csv(
            "name,email,age\nAda, ada@example.com ,36\n\nAlan,alan@example.com,41\n",
        )
        .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].email, "ada@example.com");
        assert_eq!(users[1].name, "Alan");
        assert_eq!(users[1].age, 41);
    }

    #[test]
    fn test_parse_seed_csv_rejects_bad_age() {
        let err = parse_seed_csv("name,email,age\nAda,ada@example.com,old\n").unwrap_err();
        assert!(matches!(err, MessagingError::InvalidArgument(_)));
        assert!(parse_seed_csv("name,email,age\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_seed_rejects_garbage() {
        assert!(matches!(
            parse_seed("{not json"),
            Err(MessagingError::InvalidArgument(_))
        ));
    }
}
