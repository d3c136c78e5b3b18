//! `PostgreSQL`-backed inventory.
//!
//! Used when the order service owns the `events` table itself rather than
//! calling a remote inventory service.
//!
//! # Decrement
//!
//! One transaction:
//!
//! 1. Record the booking id in `inventory_decrements` (`ON CONFLICT DO NOTHING`).
//!    No row inserted means the decrement was already applied.
//! 2. `UPDATE events SET left_capacity = left_capacity - n WHERE left_capacity >= n`.
//!    The row lock serializes concurrent decrements of one event, and the guard
//!    keeps capacity from going negative.
//!
//! If step 2 matches no row the transaction is rolled back, which also removes
//! the idempotency record.

use rust_decimal::Decimal;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use ticketflow_core::inventory::{
    DecrementOutcome, InventoryError, InventoryQuery, InventorySnapshot, InventoryUpdate,
};
use ticketflow_core::types::{BookingId, EventId};

fn unavailable(context: &str, err: &sqlx::Error) -> InventoryError {
    InventoryError::Unavailable(format!("{context}: {err}"))
}

#[allow(clippy::cast_sign_loss)] // guarded by CHECK (left_capacity >= 0)
const fn capacity(left: i64) -> u64 {
    if left < 0 { 0 } else { left as u64 }
}

/// Inventory over the `events` and `inventory_decrements` tables.
#[derive(Clone)]
pub struct PostgresInventory {
    pool: PgPool,
}

impl PostgresInventory {
    /// Create an inventory over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an event with `capacity` tickets and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] if the insert fails.
    pub async fn create_event(
        &self,
        name: &str,
        capacity: u64,
        ticket_price: Decimal,
    ) -> Result<EventId, InventoryError> {
        let capacity = i64::try_from(capacity)
            .map_err(|_| InventoryError::Unavailable(format!("Capacity {capacity} out of range")))?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO events (name, total_capacity, left_capacity, ticket_price)
             VALUES ($1, $2, $2, $3)
             RETURNING id",
        )
        .bind(name)
        .bind(capacity)
        .bind(ticket_price)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unavailable("Failed to insert event", &e))?;

        Ok(EventId::new(id))
    }

    async fn decrement(
        &self,
        event_id: EventId,
        ticket_count: u32,
        key: BookingId,
    ) -> Result<DecrementOutcome, InventoryError> {
        let requested = i64::from(ticket_count);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| unavailable("Failed to begin transaction", &e))?;

        let recorded = sqlx::query(
            "INSERT INTO inventory_decrements (booking_id, event_id, ticket_count)
             SELECT $1, id, $3 FROM events WHERE id = $2
             ON CONFLICT (booking_id) DO NOTHING",
        )
        .bind(key.as_uuid())
        .bind(event_id.get())
        .bind(requested)
        .execute(&mut *tx)
        .await
        .map_err(|e| unavailable("Failed to record decrement", &e))?
        .rows_affected();

        if recorded == 0 {
            let already: (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM inventory_decrements WHERE booking_id = $1)",
            )
            .bind(key.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| unavailable("Failed to check decrement", &e))?;

            tx.rollback()
                .await
                .map_err(|e| unavailable("Failed to roll back", &e))?;

            return if already.0 {
                tracing::debug!(
                    booking_id = %key,
                    event_id = %event_id,
                    "Decrement already applied"
                );
                Ok(DecrementOutcome::AlreadyApplied)
            } else {
                Err(InventoryError::EventNotFound(event_id))
            };
        }

        let updated: Option<(i64,)> = sqlx::query_as(
            "UPDATE events SET left_capacity = left_capacity - $2
             WHERE id = $1 AND left_capacity >= $2
             RETURNING left_capacity",
        )
        .bind(event_id.get())
        .bind(requested)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| unavailable("Failed to decrement capacity", &e))?;

        if let Some((left,)) = updated {
            tx.commit()
                .await
                .map_err(|e| unavailable("Failed to commit decrement", &e))?;
            return Ok(DecrementOutcome::Applied {
                remaining: capacity(left),
            });
        }

        let (left,): (i64,) = sqlx::query_as("SELECT left_capacity FROM events WHERE id = $1")
            .bind(event_id.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| unavailable("Failed to read capacity", &e))?;
        tx.rollback()
            .await
            .map_err(|e| unavailable("Failed to roll back", &e))?;

        Err(InventoryError::InsufficientCapacity {
            event_id,
            requested: ticket_count,
            available: capacity(left),
        })
    }
}

impl InventoryQuery for PostgresInventory {
    fn get_inventory(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<InventorySnapshot, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let row: Option<(String, i64, Decimal)> = sqlx::query_as(
                "SELECT name, left_capacity, ticket_price FROM events WHERE id = $1",
            )
            .bind(event_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("Failed to load event", &e))?;

            let (event_name, left, ticket_price) =
                row.ok_or(InventoryError::EventNotFound(event_id))?;
            Ok(InventorySnapshot {
                event_id,
                event_name,
                capacity: capacity(left),
                ticket_price,
            })
        })
    }
}

impl InventoryUpdate for PostgresInventory {
    fn decrement_capacity(
        &self,
        event_id: EventId,
        ticket_count: u32,
        key: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<DecrementOutcome, InventoryError>> + Send + '_>> {
        Box::pin(self.decrement(event_id, ticket_count, key))
    }
}
