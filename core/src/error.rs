//! Workflow error taxonomy.
//!
//! Booking errors are returned synchronously to the caller. Order errors
//! decide what happens to the delivery that triggered them: see
//! [`OrderError::is_redeliverable`].

use crate::event::EventError;
use crate::event_bus::EventBusError;
use crate::inventory::InventoryError;
use crate::order::StoreError;
use crate::types::{BookingId, CustomerId, EventId, OrderId};
use std::time::Duration;
use thiserror::Error;

/// Why a booking request was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The request asked for zero tickets.
    #[error("Ticket count must be at least 1, got {0}")]
    InvalidTicketCount(u32),

    /// No customer with this id.
    #[error("Customer {0} not found")]
    CustomerNotFound(CustomerId),

    /// No event with this id.
    #[error("Event {0} not found")]
    EventNotFound(EventId),

    /// Fewer tickets left than requested at booking time.
    #[error("Not enough tickets for event {event_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        /// Event concerned
        event_id: EventId,
        /// Tickets requested
        requested: u32,
        /// Tickets available in the snapshot
        available: u64,
    },

    /// The booking event could not be published.
    #[error("Failed to publish booking: {0}")]
    PublishFailure(String),

    /// A lookup dependency failed.
    #[error("{dependency} unavailable: {reason}")]
    Unavailable {
        /// Which collaborator failed
        dependency: &'static str,
        /// What went wrong
        reason: String,
    },

    /// A collaborator call did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Which call timed out
        operation: &'static str,
        /// The bound that elapsed
        after: Duration,
    },
}

impl BookingError {
    /// Whether the caller's request itself is at fault (as opposed to infrastructure).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTicketCount(_)
                | Self::CustomerNotFound(_)
                | Self::EventNotFound(_)
                | Self::InsufficientInventory { .. }
        )
    }

    /// Short stable label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTicketCount(_) => "invalid_ticket_count",
            Self::CustomerNotFound(_) => "customer_not_found",
            Self::EventNotFound(_) => "event_not_found",
            Self::InsufficientInventory { .. } => "insufficient_inventory",
            Self::PublishFailure(_) => "publish_failure",
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<EventBusError> for BookingError {
    fn from(err: EventBusError) -> Self {
        Self::PublishFailure(err.to_string())
    }
}

impl From<EventError> for BookingError {
    fn from(err: EventError) -> Self {
        Self::PublishFailure(err.to_string())
    }
}

/// Why processing a booking event did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// The payload is not a usable booking event.
    #[error("Unusable booking event: {0}")]
    Decode(#[from] EventError),

    /// The order could not be written or its status could not be recorded.
    #[error("Failed to persist order for booking {booking_id}: {source}")]
    PersistFailure {
        /// Booking being processed
        booking_id: BookingId,
        /// Store failure
        source: StoreError,
    },

    /// The inventory decrement failed after the order was persisted.
    #[error("Inventory update failed for order {order_id}: {source}")]
    InventoryUpdateFailure {
        /// Order whose decrement is outstanding
        order_id: OrderId,
        /// Last inventory failure
        source: InventoryError,
    },
}

impl OrderError {
    /// Whether the triggering delivery should be handed back for redelivery.
    ///
    /// Persist failures leave no durable trace, so redelivery is the retry,
    /// unless the store refused the record itself. Inventory failures are
    /// already recorded as a `Pending` order and are retried by the
    /// reconciler; undecodable payloads never succeed.
    #[must_use]
    pub const fn is_redeliverable(&self) -> bool {
        matches!(
            self,
            Self::PersistFailure { source, .. } if !matches!(source, StoreError::Rejected(_))
        )
    }
}
