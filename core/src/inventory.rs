//! Inventory query and update interfaces.
//!
//! The inventory service is the system of record for availability. Booking
//! reads a snapshot; the order workflow decrements capacity once per booking.
//!
//! # Contract for [`InventoryUpdate`]
//!
//! - The decrement is atomic per event: concurrent calls can never drive the
//!   remaining capacity below zero.
//! - The call is idempotent on its key: repeating a decrement with the same
//!   [`BookingId`] reports [`DecrementOutcome::AlreadyApplied`] and changes nothing.

use crate::types::{BookingId, EventId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Availability and price of an event at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySnapshot {
    /// Event key
    pub event_id: EventId,
    /// Event name
    #[serde(rename = "event", default)]
    pub event_name: String,
    /// Tickets still available
    pub capacity: u64,
    /// Price of one ticket
    pub ticket_price: Decimal,
}

/// Result of a successful decrement call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Capacity was decremented by this call.
    Applied {
        /// Capacity left after the decrement
        remaining: u64,
    },
    /// A decrement with this key had already been applied.
    AlreadyApplied,
}

/// Errors from the inventory service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// No event with this id.
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// The decrement would drive capacity below zero.
    #[error("Insufficient capacity for event {event_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Event concerned
        event_id: EventId,
        /// Tickets requested
        requested: u32,
        /// Tickets left
        available: u64,
    },

    /// The service could not be reached or failed internally.
    #[error("Inventory service unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("Inventory call timed out after {0:?}")]
    Timeout(Duration),
}

impl InventoryError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Read side of the inventory service.
pub trait InventoryQuery: Send + Sync {
    /// Current capacity and price of `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::EventNotFound`] for an unknown event, or a
    /// transient error if the service is unreachable.
    fn get_inventory(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<InventorySnapshot, InventoryError>> + Send + '_>>;
}

/// Write side of the inventory service.
pub trait InventoryUpdate: Send + Sync {
    /// Decrement the capacity of `event_id` by `ticket_count`, at most once per `key`.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InsufficientCapacity`] when the event has fewer
    /// tickets left than requested, [`InventoryError::EventNotFound`] for an unknown
    /// event, or a transient error.
    fn decrement_capacity(
        &self,
        event_id: EventId,
        ticket_count: u32,
        key: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<DecrementOutcome, InventoryError>> + Send + '_>>;
}
