//! Prometheus metrics and scoped connections for the database pool
//!
//! Tracks pool size, connection acquisition latency, hold time and errors

use prometheus::{register_histogram_vec, register_int_counter_vec, register_int_gauge_vec};
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec};
use sqlx::{pool::PoolConnection, PgConnection, PgPool, Postgres};
use std::ops::{Deref, DerefMut};
use std::time::Instant;
use tracing::{debug, warn};

lazy_static::lazy_static! {
    /// Database connection pool size by state (idle/active/max)
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Time to acquire a connection from the pool
    static ref DB_POOL_ACQUIRE_DURATION: HistogramVec = register_histogram_vec!(
        "db_pool_acquire_duration_seconds",
        "Time to acquire connection from pool",
        &["service"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// How long a scoped connection was held before release
    static ref DB_POOL_HOLD_DURATION: HistogramVec = register_histogram_vec!(
        "db_pool_hold_duration_seconds",
        "Time a scoped connection was held before being returned",
        &["service"],
        vec![0.001, 0.01, 0.1, 1.0, 10.0, 60.0, 600.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Connection acquisition errors by type
    static ref DB_POOL_CONNECTION_ERRORS: IntCounterVec = register_int_counter_vec!(
        "db_pool_connection_errors_total",
        "Connection acquisition errors",
        &["service", "error_type"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Update connection pool metrics (called periodically)
pub(crate) fn update_pool_metrics(pool: &PgPool, service: &str) {
    let size = pool.size() as i64;
    let idle = pool.num_idle() as i64;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(size - idle);

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(pool.options().get_max_connections() as i64);
}

/// Error label used for the acquisition error counter
pub(crate) fn error_type(e: &sqlx::Error) -> &'static str {
    match e {
        sqlx::Error::PoolTimedOut => "timeout",
        sqlx::Error::PoolClosed => "closed",
        sqlx::Error::Io(_) => "io",
        _ => "other",
    }
}

/// A pooled connection that is returned to the pool when dropped.
///
/// Release happens on every exit path: normal completion, early return, `?`
/// propagation and panics unwinding through the owner. Long-lived readers
/// such as chunked scans hold one of these for their whole lifetime.
pub struct ScopedConnection {
    conn: PoolConnection<Postgres>,
    service: String,
    acquired_at: Instant,
}

impl ScopedConnection {
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Deref for ScopedConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        let held = self.acquired_at.elapsed();
        DB_POOL_HOLD_DURATION
            .with_label_values(&[self.service.as_str()])
            .observe(held.as_secs_f64());
        debug!(
            service = %self.service,
            held_ms = held.as_millis() as u64,
            "Scoped connection released"
        );
    }
}

/// Acquire a scoped connection from the pool and record metrics
///
/// # Example
/// ```no_run
/// # use db_pool::{create_pool, DbConfig, acquire_scoped};
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let pool = create_pool(DbConfig::from_env("test")?).await?;
/// let mut conn = acquire_scoped(&pool, "messaging-service").await?;
/// sqlx::query("SELECT 1").execute(&mut *conn).await?;
/// // connection goes back to the pool here
/// # Ok(())
/// # }
/// ```
pub async fn acquire_scoped(pool: &PgPool, service: &str) -> Result<ScopedConnection, sqlx::Error> {
    let start = Instant::now();
    let result = pool.acquire().await;

    DB_POOL_ACQUIRE_DURATION
        .with_label_values(&[service])
        .observe(start.elapsed().as_secs_f64());

    match result {
        Ok(conn) => {
            debug!(service = %service, "Scoped connection acquired");
            Ok(ScopedConnection {
                conn,
                service: service.to_string(),
                acquired_at: Instant::now(),
            })
        }
        Err(e) => {
            warn!(service = %service, error = %e, "Failed to acquire connection");
            DB_POOL_CONNECTION_ERRORS
                .with_label_values(&[service, error_type(&e)])
                .inc();
            Err(e)
        }
    }
}
