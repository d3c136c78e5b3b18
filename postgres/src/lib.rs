//! `PostgreSQL` adapters for the booking pipeline.
//!
//! This crate implements the collaborator traits of `ticketflow-core` on top of
//! a sqlx connection pool:
//!
//! - [`PostgresOrderStore`]: orders, unique per booking
//! - [`PostgresCustomerDirectory`]: customer lookup
//! - [`PostgresInventory`]: event capacity with idempotent, atomic decrements
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ticketflow_postgres::{PostgresOrderStore, connect, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/ticketing", 10, Duration::from_secs(5)).await?;
//! migrate(&pool).await?;
//! let orders = PostgresOrderStore::new(pool);
//! # Ok(())
//! # }
//! ```

mod customers;
mod inventory;
mod orders;

pub use customers::PostgresCustomerDirectory;
pub use inventory::PostgresInventory;
pub use orders::PostgresOrderStore;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use ticketflow_core::order::StoreError;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::ConnectionFailed`] if no connection can be established
/// within `connect_timeout`.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    connect_timeout: Duration,
) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::ConnectionFailed(format!("Failed to connect: {e}")))?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Create or upgrade the `customers`, `events`, `inventory_decrements` and
/// `orders` tables.
///
/// # Errors
///
/// Returns [`StoreError::QueryFailed`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Migration failed: {e}")))
}

/// Classify a sqlx failure.
///
/// Data exceptions (SQLSTATE class 22) and integrity violations (class 23)
/// are [`StoreError::Rejected`]: the same row fails the same way every time.
pub(crate) fn store_error(context: &str, err: &sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::ConnectionFailed(format!("{context}: {err}")),
        sqlx::Error::Database(db) if db.code().is_some_and(|code| is_data_error(&code)) => {
            StoreError::Rejected(format!("{context}: {err}"))
        }
        _ => StoreError::QueryFailed(format!("{context}: {err}")),
    }
}

fn is_data_error(sqlstate: &str) -> bool {
    sqlstate.starts_with("22") || sqlstate.starts_with("23")
}
