//! In-memory inventory service.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticketflow_core::inventory::{
    DecrementOutcome, InventoryError, InventoryQuery, InventorySnapshot, InventoryUpdate,
};
use ticketflow_core::types::{BookingId, EventId};

#[derive(Default)]
struct InventoryState {
    events: HashMap<EventId, InventorySnapshot>,
    applied: HashSet<BookingId>,
    decrement_calls: usize,
    failing_queries: usize,
    failing_decrements: usize,
    query_delay: Option<Duration>,
    decrement_delay: Option<Duration>,
}

/// Inventory held in a map, implementing both [`InventoryQuery`] and
/// [`InventoryUpdate`].
///
/// Decrements are applied under one lock, so concurrent callers observe the
/// same atomicity as the real service. Failures and latency can be injected.
///
/// # Example
///
/// ```
/// use ticketflow_testing::InMemoryInventory;
/// use ticketflow_core::inventory::{DecrementOutcome, InventoryUpdate};
/// use ticketflow_core::types::{BookingId, EventId};
/// use rust_decimal::Decimal;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let inventory =
///     InMemoryInventory::new().with_event(EventId::new(5), "Concert", 100, Decimal::new(1000, 2));
/// let key = BookingId::new();
///
/// let first = inventory.decrement_capacity(EventId::new(5), 3, key).await?;
/// assert_eq!(first, DecrementOutcome::Applied { remaining: 97 });
///
/// let again = inventory.decrement_capacity(EventId::new(5), 3, key).await?;
/// assert_eq!(again, DecrementOutcome::AlreadyApplied);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryInventory {
    state: Arc<Mutex<InventoryState>>,
}

impl InMemoryInventory {
    /// Create an inventory with no events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event (builder style).
    #[must_use]
    pub fn with_event(
        self,
        event_id: EventId,
        name: &str,
        capacity: u64,
        ticket_price: Decimal,
    ) -> Self {
        self.add_event(event_id, name, capacity, ticket_price);
        self
    }

    /// Add or replace an event.
    pub fn add_event(&self, event_id: EventId, name: &str, capacity: u64, ticket_price: Decimal) {
        self.state.lock().unwrap().events.insert(
            event_id,
            InventorySnapshot {
                event_id,
                event_name: name.to_string(),
                capacity,
                ticket_price,
            },
        );
    }

    /// Remaining capacity of an event.
    #[must_use]
    pub fn capacity(&self, event_id: EventId) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .events
            .get(&event_id)
            .map(|e| e.capacity)
    }

    /// Number of decrement calls received, including failed and repeated ones.
    #[must_use]
    pub fn decrement_calls(&self) -> usize {
        self.state.lock().unwrap().decrement_calls
    }

    /// Fail the next `n` inventory queries with [`InventoryError::Unavailable`].
    pub fn fail_next_queries(&self, n: usize) {
        self.state.lock().unwrap().failing_queries = n;
    }

    /// Fail the next `n` decrements with [`InventoryError::Unavailable`].
    pub fn fail_next_decrements(&self, n: usize) {
        self.state.lock().unwrap().failing_decrements = n;
    }

    /// Delay every inventory query by `delay`.
    pub fn delay_queries(&self, delay: Duration) {
        self.state.lock().unwrap().query_delay = Some(delay);
    }

    /// Delay every decrement by `delay`.
    pub fn delay_decrements(&self, delay: Duration) {
        self.state.lock().unwrap().decrement_delay = Some(delay);
    }
}

impl InventoryQuery for InMemoryInventory {
    fn get_inventory(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<InventorySnapshot, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let delay = self.state.lock().unwrap().query_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state.lock().unwrap();
            if state.failing_queries > 0 {
                state.failing_queries -= 1;
                return Err(InventoryError::Unavailable("injected failure".to_string()));
            }
            state
                .events
                .get(&event_id)
                .cloned()
                .ok_or(InventoryError::EventNotFound(event_id))
        })
    }
}

impl InventoryUpdate for InMemoryInventory {
    fn decrement_capacity(
        &self,
        event_id: EventId,
        ticket_count: u32,
        key: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<DecrementOutcome, InventoryError>> + Send + '_>> {
        Box::pin(async move {
            let delay = self.state.lock().unwrap().decrement_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state.lock().unwrap();
            state.decrement_calls += 1;
            if state.failing_decrements > 0 {
                state.failing_decrements -= 1;
                return Err(InventoryError::Unavailable("injected failure".to_string()));
            }
            if state.applied.contains(&key) {
                return Ok(DecrementOutcome::AlreadyApplied);
            }

            let event = state
                .events
                .get_mut(&event_id)
                .ok_or(InventoryError::EventNotFound(event_id))?;
            let requested = u64::from(ticket_count);
            if event.capacity < requested {
                return Err(InventoryError::InsufficientCapacity {
                    event_id,
                    requested: ticket_count,
                    available: event.capacity,
                });
            }
            event.capacity -= requested;
            let remaining = event.capacity;
            state.applied.insert(key);
            Ok(DecrementOutcome::Applied { remaining })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inventory() -> InMemoryInventory {
        InMemoryInventory::new().with_event(EventId::new(5), "Concert", 4, dec!(10.00))
    }

    #[tokio::test]
    async fn refuses_to_go_below_zero() {
        let inventory = inventory();
        let result = inventory
            .decrement_capacity(EventId::new(5), 5, BookingId::new())
            .await;

        assert_eq!(
            result,
            Err(InventoryError::InsufficientCapacity {
                event_id: EventId::new(5),
                requested: 5,
                available: 4,
            })
        );
        assert_eq!(inventory.capacity(EventId::new(5)), Some(4));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let inventory = inventory();
        inventory.fail_next_decrements(1);
        let key = BookingId::new();

        assert!(inventory.decrement_capacity(EventId::new(5), 1, key).await.is_err());
        assert_eq!(
            inventory.decrement_capacity(EventId::new(5), 1, key).await,
            Ok(DecrementOutcome::Applied { remaining: 3 })
        );
        assert_eq!(inventory.decrement_calls(), 2);
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let inventory = inventory();
        assert_eq!(
            inventory.get_inventory(EventId::new(99)).await,
            Err(InventoryError::EventNotFound(EventId::new(99)))
        );
    }
}
