//! Message edit tracking, receiver notifications and chunked streaming.
//!
//! The write path ([`services::MessageService`]) keeps an append-only history
//! of every content change and creates one notification per new message, all
//! inside a single store transaction. [`streaming`] reads large tables in
//! bounded chunks. Both talk to storage through [`store::DataStore`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod streaming;

pub use error::{MessagingError, MessagingResult, StorageError, StorageResult};
