use dotenvy::dotenv;
use query_cache::EvictionPolicy;
use resilience::RetryConfig;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MessagingError, MessagingResult};

#[derive(Clone)]
pub struct Config {
    pub service_name: String,
    /// `None` selects the in-memory store
    pub database_url: Option<String>,
    pub stream_chunk_size: i64,
    pub history_cache: EvictionPolicy,
    pub connect_retry: RetryConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("service_name", &self.service_name)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("stream_chunk_size", &self.stream_chunk_size)
            .field("history_cache", &self.history_cache)
            .field("connect_retry", &self.connect_retry)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "messaging-service".to_string(),
            database_url: None,
            stream_chunk_size: 100,
            history_cache: EvictionPolicy::default(),
            connect_retry: RetryConfig {
                max_retries: 3,
                initial_backoff: Duration::from_millis(200),
                ..Default::default()
            },
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> MessagingResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MessagingError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> MessagingResult<Self> {
        dotenv().ok();
        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let service_name =
            env::var("SERVICE_NAME").unwrap_or_else(|_| defaults.service_name.clone());

        let stream_chunk_size: i64 = parse_var("STREAM_CHUNK_SIZE", defaults.stream_chunk_size)?;
        if stream_chunk_size <= 0 {
            return Err(MessagingError::Config(format!(
                "STREAM_CHUNK_SIZE must be positive, got {}",
                stream_chunk_size
            )));
        }

        let max_entries = parse_var(
            "HISTORY_CACHE_MAX_ENTRIES",
            defaults.history_cache.max_entries,
        )?;
        let ttl_secs: u64 = parse_var("HISTORY_CACHE_TTL_SECS", 300)?;
        let history_cache = EvictionPolicy {
            max_entries,
            time_to_live: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        };

        let connect_retry = RetryConfig {
            max_retries: parse_var("CONNECT_MAX_RETRIES", defaults.connect_retry.max_retries)?,
            initial_backoff: Duration::from_millis(parse_var("CONNECT_INITIAL_BACKOFF_MS", 200)?),
            ..defaults.connect_retry
        };

        Ok(Self {
            service_name,
            database_url,
            stream_chunk_size,
            history_cache,
            connect_retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 7] = [
        "DATABASE_URL",
        "SERVICE_NAME",
        "STREAM_CHUNK_SIZE",
        "HISTORY_CACHE_MAX_ENTRIES",
        "HISTORY_CACHE_TTL_SECS",
        "CONNECT_MAX_RETRIES",
        "CONNECT_INITIAL_BACKOFF_MS",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_select_memory_store() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.service_name, "messaging-service");
        assert_eq!(config.stream_chunk_size, 100);
        assert_eq!(config.history_cache.max_entries, 10_000);
        assert_eq!(config.history_cache.time_to_live, Some(Duration::from_secs(300)));
        assert_eq!(config.connect_retry.max_retries, 3);
    }

    #[test]
    #[serial]
    fn test_zero_ttl_disables_expiry() {
        clear_env();
        env::set_var("HISTORY_CACHE_TTL_SECS", "0");
        let config = Config::from_env().unwrap();
        assert_eq!(config.history_cache.time_to_live, None);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_non_positive_chunk_size_is_rejected() {
        clear_env();
        env::set_var("STREAM_CHUNK_SIZE", "0");
        assert!(matches!(Config::from_env(), Err(MessagingError::Config(_))));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_garbage_value_is_a_config_error() {
        clear_env();
        env::set_var("CONNECT_MAX_RETRIES", "many");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("CONNECT_MAX_RETRIES"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_debug_hides_database_url() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://app:hunter2@db/messages");
        let config = Config::from_env().unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        clear_env();
    }
}
