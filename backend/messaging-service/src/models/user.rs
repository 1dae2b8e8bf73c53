use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MessagingError, MessagingResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub age: i32,
}

/// Registration input, also the shape of each entry in a seed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub age: i32,
}

impl NewUser {
    pub fn validate(&self) -> MessagingResult<()> {
        if self.name.trim().is_empty() {
            return Err(MessagingError::invalid("user name cannot be empty"));
        }
        if !self.email.contains('@') {
            return Err(MessagingError::invalid(format!(
                "invalid email address: {}",
                self.email
            )));
        }
        if self.age < 0 {
            return Err(MessagingError::invalid(format!("invalid age: {}", self.age)));
        }
        Ok(())
    }

    pub fn into_user(self) -> User {
        User {
            user_id: Uuid::new_v4(),
            name: self.name,
            email: self.email,
            age: self.age,
        }
    }
}
