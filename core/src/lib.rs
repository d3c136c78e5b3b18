//! # Ticketflow Core
//!
//! Domain types, event schema and collaborator traits for the booking-to-order
//! event pipeline.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌─────────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Booking  │──▶│ Customer lookup │──▶│ Event channel│──▶│ Order workflow │
//! │ request  │   │ Inventory query │   │  ("booking") │   │ store + update │
//! └──────────┘   └─────────────────┘   └──────────────┘   └────────────────┘
//! ```
//!
//! ## Core Concepts
//!
//! - **[`booking::BookingEvent`]**: the immutable unit of transfer across the channel
//! - **[`order::Order`]**: created exactly once per booking, keyed by [`types::BookingId`]
//! - **[`event_bus::EventBus`]**: at-least-once publish/subscribe with explicit acknowledgement
//! - **Collaborator traits**: [`customer::CustomerDirectory`], [`inventory::InventoryQuery`],
//!   [`inventory::InventoryUpdate`], [`order::OrderStore`]
//!
//! Every collaborator is injected explicitly as an `Arc<dyn Trait>`; the traits
//! return boxed futures so they stay object safe.

pub mod booking;
pub mod customer;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod inventory;
pub mod order;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;

/// Environment module - injected dependencies that are not collaborators.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Channel topic carrying booking events.
pub const BOOKING_TOPIC: &str = "booking";

/// Consumer group of the order service.
pub const ORDER_CONSUMER_GROUP: &str = "order-booking-group";
