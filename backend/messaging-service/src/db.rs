use db_pool::{create_pool, DbConfig};
use resilience::with_retry_if;
use sqlx::migrate::Migrator;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{is_transient_db_error, MessagingError, MessagingResult, StorageError};
use crate::store::{DataStore, MemoryStore, PgStore};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open the store selected by the configuration.
///
/// With a database URL the pool is created with transient failures retried
/// per `connect_retry`, then pending migrations are applied.
pub async fn open_store(config: &Config) -> MessagingResult<Arc<dyn DataStore>> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set, using in-memory store; nothing persists after exit");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let db_config = DbConfig::with_url(&config.service_name, url);
    db_config.log_config();

    let pool = with_retry_if(config.connect_retry.clone(), is_transient_db_error, || {
        create_pool(db_config.clone())
    })
    .await
    .map_err(|e| {
        warn!(error = %e, "Could not connect to database");
        StorageError::Database(e.into_inner())
    })?;

    MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| StorageError::Database(sqlx::Error::from(e)))?;
    info!("Database migrations applied");

    Ok(Arc::new(PgStore::new(pool, config.service_name.clone())))
}

/// Fail unless the configuration points at a database.
///
/// The in-memory store starts empty on every run, so commands that read back
/// earlier writes would always see nothing.
pub fn require_database(config: &Config, command: &str) -> MessagingResult<()> {
    if config.database_url.is_none() {
        return Err(MessagingError::Config(format!(
            "`{}` needs DATABASE_URL; the in-memory store does not persist between runs",
            command
        )));
    }
    Ok(())
}
