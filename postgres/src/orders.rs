//! `PostgreSQL`-backed order store.

use crate::store_error;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use ticketflow_core::order::{
    InventoryStatus, NewOrder, Order, OrderStore, SaveOutcome, StoreError,
};
use ticketflow_core::types::{BookingId, CustomerId, EventId, OrderId};
use uuid::Uuid;

type OrderRow = (i64, Uuid, i64, i64, i64, Decimal, String, DateTime<Utc>);

const ORDER_COLUMNS: &str =
    "id, booking_id, customer_id, event_id, ticket_count, total_price, inventory_status, created_at";

fn order_from_row(row: OrderRow) -> Result<Order, StoreError> {
    let (id, booking_id, customer_id, event_id, ticket_count, total_price, status, created_at) =
        row;
    let ticket_count = u32::try_from(ticket_count).map_err(|_| {
        StoreError::CorruptRecord(format!("Order {id} has ticket count {ticket_count}"))
    })?;

    Ok(Order {
        id: OrderId::new(id),
        booking_id: BookingId::from_uuid(booking_id),
        customer_id: CustomerId::new(customer_id),
        event_id: EventId::new(event_id),
        ticket_count,
        total_price,
        inventory_status: status.parse()?,
        created_at,
    })
}

/// Order store over the `orders` table.
///
/// `booking_id` carries a unique constraint; [`OrderStore::save`] inserts with
/// `ON CONFLICT DO NOTHING`, so concurrent redeliveries of one booking race
/// safely and all but one observe [`SaveOutcome::Existing`].
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_by_booking(&self, booking_id: BookingId) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE booking_id = $1"
        ))
        .bind(booking_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to load order by booking", &e))?;

        row.map(order_from_row).transpose()
    }
}

impl OrderStore for PostgresOrderStore {
    fn save(
        &self,
        order: NewOrder,
    ) -> Pin<Box<dyn Future<Output = Result<SaveOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let inserted: Option<OrderRow> = sqlx::query_as(&format!(
                "INSERT INTO orders
                    (booking_id, customer_id, event_id, ticket_count, total_price, inventory_status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (booking_id) DO NOTHING
                 RETURNING {ORDER_COLUMNS}"
            ))
            .bind(order.booking_id.as_uuid())
            .bind(order.customer_id.get())
            .bind(order.event_id.get())
            .bind(i64::from(order.ticket_count))
            .bind(order.total_price)
            .bind(InventoryStatus::Pending.as_str())
            .bind(order.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to insert order", &e))?;

            if let Some(row) = inserted {
                let created = order_from_row(row)?;
                tracing::debug!(
                    order_id = %created.id,
                    booking_id = %created.booking_id,
                    "Order inserted"
                );
                return Ok(SaveOutcome::Created(created));
            }

            // Conflict: the row exists and is committed, since the insert waited on it.
            let existing = self.fetch_by_booking(order.booking_id).await?.ok_or_else(|| {
                StoreError::QueryFailed(format!(
                    "Order for booking {} conflicted but could not be read",
                    order.booking_id
                ))
            })?;
            Ok(SaveOutcome::Existing(existing))
        })
    }

    fn find_by_id(
        &self,
        id: OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row: Option<OrderRow> =
                sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                    .bind(id.get())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| store_error("Failed to load order", &e))?;

            row.map(order_from_row).transpose()
        })
    }

    fn find_by_booking(
        &self,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>> {
        Box::pin(self.fetch_by_booking(booking_id))
    }

    fn set_inventory_status(
        &self,
        id: OrderId,
        status: InventoryStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE orders SET inventory_status = $2 WHERE id = $1")
                .bind(id.get())
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("Failed to update inventory status", &e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::OrderNotFound(id));
            }
            Ok(())
        })
    }

    fn pending_inventory(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows: Vec<OrderRow> = sqlx::query_as(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders
                 WHERE inventory_status = $1
                 ORDER BY created_at, id
                 LIMIT $2"
            ))
            .bind(InventoryStatus::Pending.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to scan pending orders", &e))?;

            rows.into_iter().map(order_from_row).collect()
        })
    }
}
