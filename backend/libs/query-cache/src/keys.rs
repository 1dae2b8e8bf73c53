//! Cache key schema
//!
//! Key format: v{VERSION}:{entity}:{sub_key}:{identifier}

use uuid::Uuid;

/// Cache schema version - increment when changing key formats
pub const CACHE_VERSION: u32 = 1;

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Edit history of one message
    /// Format: v1:message:history:{message_id}
    pub fn message_history(message_id: Uuid) -> String {
        format!("v{}:message:history:{}", CACHE_VERSION, message_id)
    }
}
