//! `PostgreSQL` store for Holdfast.
//!
//! [`PostgresStore`] implements every store trait of `holdfast-core` on top of
//! a sqlx connection pool. Each conditional write is a single statement or a
//! single transaction:
//!
//! - stock: `UPDATE … SET quantity = quantity - $n WHERE … AND quantity >= $n RETURNING`
//! - bookings: `SELECT … FOR UPDATE` on the session row, then sum and insert
//! - reservations: `UPDATE … WHERE status = $expected RETURNING`
//! - orders: partial unique index on `payment_reference`
//!
//! # Example
//!
//! ```no_run
//! use holdfast_postgres::{PostgresConfig, PostgresStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PostgresConfig::new("postgres://localhost/holdfast");
//! let store = PostgresStore::connect(&config).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod catalog;
mod ledger;
mod rows;
mod schema;

use holdfast_core::store::{CommerceStore, StoreError, StoreFuture};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

pub use schema::migrate;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// Time allowed to acquire a connection
    pub connect_timeout: Duration,
    /// Server-side `statement_timeout` applied to every connection
    pub statement_timeout: Duration,
}

impl PostgresConfig {
    /// Settings with default pool size and timeouts.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(5),
        }
    }
}

/// Store backed by a `PostgreSQL` pool.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Open a pool. Every new connection gets the configured `statement_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the pool cannot connect.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let timeout_ms = config.statement_timeout.as_millis();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    let statement = format!("SET statement_timeout = {timeout_ms}");
                    sqlx::query(&statement)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
            .map_err(rows::db)?;

        tracing::info!(
            max_connections = config.max_connections,
            statement_timeout_ms = u64::try_from(timeout_ms).unwrap_or(u64::MAX),
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if a statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        schema::migrate(&self.pool).await
    }
}

impl CommerceStore for PostgresStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(rows::db)?;
            Ok(())
        })
    }
}
