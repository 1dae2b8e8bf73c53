pub mod edit_tracking;
pub mod message_service;
pub mod user_directory;

pub use edit_tracking::{on_after_create, on_before_update, EditOutcome};
pub use message_service::{CreatedMessage, EditedMessage, MessageObserver, MessageService};
pub use user_directory::{parse_seed, parse_seed_csv, UserDirectory};
