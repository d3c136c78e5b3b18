//! Orders and the order store.
//!
//! An order is written once per booking, before inventory is touched, and
//! then carries the state of that booking's inventory decrement:
//!
//! ```text
//! Pending ──decrement applied──▶ Applied
//!    │
//!    └────capacity exhausted───▶ Rejected
//! ```

use crate::booking::BookingEvent;
use crate::types::{BookingId, CustomerId, EventId, OrderId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Errors from the persistence collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not reach the store.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// The store rejected or failed a query.
    #[error("Store query failed: {0}")]
    QueryFailed(String),

    /// The record breaks a constraint of the store; writing it again fails the same way.
    #[error("Store rejected record: {0}")]
    Rejected(String),

    /// A stored row could not be mapped back into the domain.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// No order with this id.
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),
}

/// Where an order's inventory decrement stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    /// Order saved; decrement not confirmed yet.
    Pending,
    /// Decrement acknowledged by the inventory service.
    Applied,
    /// Inventory refused the decrement (capacity ran out after booking).
    Rejected,
}

impl InventoryStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }

    /// Whether no further inventory work is needed.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "applied" => Ok(Self::Applied),
            "rejected" => Ok(Self::Rejected),
            _ => Err(StoreError::CorruptRecord(format!(
                "Invalid inventory status: {s}"
            ))),
        }
    }
}

/// An order as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Store-assigned id
    pub id: OrderId,
    /// Booking this order was created from (unique)
    pub booking_id: BookingId,
    /// Customer who booked
    pub customer_id: CustomerId,
    /// Event booked
    pub event_id: EventId,
    /// Number of tickets
    pub ticket_count: u32,
    /// Price as computed at booking time
    pub total_price: Decimal,
    /// State of the inventory decrement
    pub inventory_status: InventoryStatus,
    /// When the order was written
    pub created_at: DateTime<Utc>,
}

/// An order about to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    /// Booking this order is created from
    pub booking_id: BookingId,
    /// Customer who booked
    pub customer_id: CustomerId,
    /// Event booked
    pub event_id: EventId,
    /// Number of tickets
    pub ticket_count: u32,
    /// Price as computed at booking time
    pub total_price: Decimal,
    /// When the order is being written
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Map a consumed booking event onto a new order.
    #[must_use]
    pub fn from_booking(event: &BookingEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            booking_id: event.booking_id,
            customer_id: event.user_id,
            event_id: event.event_id,
            ticket_count: event.ticket_count,
            total_price: event.total_price,
            created_at,
        }
    }
}

/// Result of [`OrderStore::save`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The order was written by this call (status `Pending`).
    Created(Order),
    /// An order for this booking already existed; nothing was written.
    Existing(Order),
}

impl SaveOutcome {
    /// The stored order, whichever way it got there.
    #[must_use]
    pub const fn order(&self) -> &Order {
        match self {
            Self::Created(order) | Self::Existing(order) => order,
        }
    }
}

/// Persistence for orders.
///
/// `save` is insert-if-absent on `booking_id`; two saves of the same booking
/// never produce two rows.
pub trait OrderStore: Send + Sync {
    /// Insert the order unless one exists for its booking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write could not be made durable.
    fn save(
        &self,
        order: NewOrder,
    ) -> Pin<Box<dyn Future<Output = Result<SaveOutcome, StoreError>> + Send + '_>>;

    /// Find an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn find_by_id(
        &self,
        id: OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>>;

    /// Find the order created for a booking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn find_by_booking(
        &self,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>>;

    /// Record the outcome of the order's inventory decrement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OrderNotFound`] for an unknown id, or another
    /// [`StoreError`] if the write fails.
    fn set_inventory_status(
        &self,
        id: OrderId,
        status: InventoryStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Up to `limit` orders still `Pending`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn pending_inventory(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, StoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_column_value() {
        for status in [
            InventoryStatus::Pending,
            InventoryStatus::Applied,
            InventoryStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<InventoryStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_status_is_a_corrupt_record() {
        assert!(matches!(
            "shipped".parse::<InventoryStatus>(),
            Err(StoreError::CorruptRecord(_))
        ));
    }

    #[test]
    fn only_pending_is_unsettled() {
        assert!(!InventoryStatus::Pending.is_settled());
        assert!(InventoryStatus::Applied.is_settled());
        assert!(InventoryStatus::Rejected.is_settled());
    }
}
