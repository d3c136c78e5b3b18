//! # Ticketflow Testing
//!
//! Testing utilities for the booking pipeline.
//!
//! This crate provides:
//! - In-memory implementations of every collaborator trait
//! - A deterministic [`Clock`]
//! - Builders for booking events and property-test strategies
//!
//! ## Example
//!
//! ```
//! use ticketflow_testing::{InMemoryCustomerDirectory, InMemoryInventory, test_clock};
//! use ticketflow_core::types::{CustomerId, EventId};
//! use rust_decimal::Decimal;
//!
//! let customers = InMemoryCustomerDirectory::new()
//!     .with_customer(CustomerId::new(1), "Ada", "ada@example.com");
//! let inventory = InMemoryInventory::new()
//!     .with_event(EventId::new(5), "Concert", 100, Decimal::new(1000, 2));
//! let clock = test_clock();
//! ```

use chrono::{DateTime, Utc};
use ticketflow_core::environment::Clock;

mod event_bus;
mod inventory;
mod stores;

pub use event_bus::InMemoryEventBus;
pub use inventory::InMemoryInventory;
pub use stores::{InMemoryCustomerDirectory, InMemoryOrderStore};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticketflow_testing::mocks::FixedClock;
    /// use ticketflow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use rust_decimal::Decimal;
    use ticketflow_core::booking::{BookingEvent, total_price};
    use ticketflow_core::event::SerializedEvent;
    use ticketflow_core::types::{BookingId, CustomerId, EventId};

    /// A booking event priced at `ticket_price` per ticket, with a fresh id.
    #[must_use]
    pub fn booking_event(
        user_id: i64,
        event_id: i64,
        ticket_count: u32,
        ticket_price: Decimal,
    ) -> BookingEvent {
        BookingEvent {
            booking_id: BookingId::new(),
            user_id: CustomerId::new(user_id),
            event_id: EventId::new(event_id),
            ticket_count,
            total_price: total_price(ticket_price, ticket_count),
            placed_at: None,
        }
    }

    /// Serialize a booking event the way the booking workflow publishes it.
    ///
    /// # Panics
    ///
    /// Panics if the event cannot be serialized, which cannot happen for
    /// well-formed events.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn serialized(event: &BookingEvent) -> SerializedEvent {
        SerializedEvent::from_event(event, None).expect("booking events always serialize")
    }

    /// Install a test subscriber honouring `RUST_LOG`; later calls are no-ops.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    /// Ticket counts a client may request.
    pub fn ticket_counts() -> impl Strategy<Value = u32> {
        1u32..=20
    }

    /// Ticket prices with two decimal places, up to 1000.00.
    pub fn ticket_prices() -> impl Strategy<Value = Decimal> {
        (0i64..=100_000).prop_map(|cents| Decimal::new(cents, 2))
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }
}
