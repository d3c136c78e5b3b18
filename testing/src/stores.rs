//! In-memory order store and customer directory.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use ticketflow_core::customer::{Customer, CustomerDirectory};
use ticketflow_core::order::{
    InventoryStatus, NewOrder, Order, OrderStore, SaveOutcome, StoreError,
};
use ticketflow_core::types::{BookingId, CustomerId, OrderId};

#[derive(Default)]
struct OrderState {
    orders: BTreeMap<OrderId, Order>,
    by_booking: HashMap<BookingId, OrderId>,
    next_id: i64,
    failing_saves: usize,
    rejected_saves: usize,
    failing_status_updates: usize,
    save_calls: usize,
}

/// Order store backed by a map, unique on `booking_id` like the real table.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrderState>>,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().orders.is_empty()
    }

    /// All stored orders, by id.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.read().unwrap().orders.values().cloned().collect()
    }

    /// Number of `save` calls received, including failed ones.
    #[must_use]
    pub fn save_calls(&self) -> usize {
        self.state.read().unwrap().save_calls
    }

    /// Fail the next `n` saves with [`StoreError::ConnectionFailed`].
    pub fn fail_next_saves(&self, n: usize) {
        self.state.write().unwrap().failing_saves = n;
    }

    /// Refuse the next `n` saves with [`StoreError::Rejected`], as a violated
    /// table constraint would.
    pub fn reject_next_saves(&self, n: usize) {
        self.state.write().unwrap().rejected_saves = n;
    }

    /// Fail the next `n` status updates with [`StoreError::ConnectionFailed`].
    pub fn fail_next_status_updates(&self, n: usize) {
        self.state.write().unwrap().failing_status_updates = n;
    }
}

impl OrderStore for InMemoryOrderStore {
    fn save(
        &self,
        order: NewOrder,
    ) -> Pin<Box<dyn Future<Output = Result<SaveOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.save_calls += 1;
            if state.failing_saves > 0 {
                state.failing_saves -= 1;
                return Err(StoreError::ConnectionFailed("injected failure".to_string()));
            }
            if state.rejected_saves > 0 {
                state.rejected_saves -= 1;
                return Err(StoreError::Rejected("injected constraint violation".to_string()));
            }

            if let Some(existing) = state
                .by_booking
                .get(&order.booking_id)
                .and_then(|id| state.orders.get(id))
            {
                return Ok(SaveOutcome::Existing(existing.clone()));
            }

            state.next_id += 1;
            let id = OrderId::new(state.next_id);
            let stored = Order {
                id,
                booking_id: order.booking_id,
                customer_id: order.customer_id,
                event_id: order.event_id,
                ticket_count: order.ticket_count,
                total_price: order.total_price,
                inventory_status: InventoryStatus::Pending,
                created_at: order.created_at,
            };
            state.by_booking.insert(order.booking_id, id);
            state.orders.insert(id, stored.clone());
            Ok(SaveOutcome::Created(stored))
        })
    }

    fn find_by_id(
        &self,
        id: OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.read().unwrap().orders.get(&id).cloned()) })
    }

    fn find_by_booking(
        &self,
        booking_id: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .by_booking
                .get(&booking_id)
                .and_then(|id| state.orders.get(id))
                .cloned())
        })
    }

    fn set_inventory_status(
        &self,
        id: OrderId,
        status: InventoryStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if state.failing_status_updates > 0 {
                state.failing_status_updates -= 1;
                return Err(StoreError::ConnectionFailed("injected failure".to_string()));
            }
            let order = state
                .orders
                .get_mut(&id)
                .ok_or(StoreError::OrderNotFound(id))?;
            order.inventory_status = status;
            Ok(())
        })
    }

    fn pending_inventory(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut pending: Vec<Order> = state
                .orders
                .values()
                .filter(|o| o.inventory_status == InventoryStatus::Pending)
                .cloned()
                .collect();
            pending.sort_by_key(|o| (o.created_at, o.id));
            pending.truncate(limit);
            Ok(pending)
        })
    }
}

/// Customer directory backed by a map.
#[derive(Clone, Default)]
pub struct InMemoryCustomerDirectory {
    customers: Arc<RwLock<HashMap<CustomerId, Customer>>>,
    unavailable: Arc<RwLock<bool>>,
}

impl InMemoryCustomerDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a customer (builder style).
    #[must_use]
    pub fn with_customer(self, id: CustomerId, name: &str, email: &str) -> Self {
        self.customers.write().unwrap().insert(
            id,
            Customer {
                id,
                name: name.to_string(),
                email: email.to_string(),
            },
        );
        self
    }

    /// Make lookups fail with [`StoreError::ConnectionFailed`] (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().unwrap() = unavailable;
    }
}

impl CustomerDirectory for InMemoryCustomerDirectory {
    fn find_by_id(
        &self,
        id: CustomerId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Customer>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            if *self.unavailable.read().unwrap() {
                return Err(StoreError::ConnectionFailed("injected failure".to_string()));
            }
            Ok(self.customers.read().unwrap().get(&id).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use ticketflow_core::types::EventId;

    fn new_order(booking_id: BookingId) -> NewOrder {
        NewOrder {
            booking_id,
            customer_id: CustomerId::new(1),
            event_id: EventId::new(5),
            ticket_count: 3,
            total_price: dec!(30.00),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_save_of_a_booking_returns_the_existing_order() {
        let store = InMemoryOrderStore::new();
        let booking_id = BookingId::new();

        let first = store.save(new_order(booking_id)).await.unwrap();
        let second = store.save(new_order(booking_id)).await.unwrap();

        assert!(matches!(first, SaveOutcome::Created(_)));
        assert!(matches!(second, SaveOutcome::Existing(_)));
        assert_eq!(first.order().id, second.order().id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn settled_orders_leave_the_pending_list() {
        let store = InMemoryOrderStore::new();
        let order = store.save(new_order(BookingId::new())).await.unwrap();
        store.save(new_order(BookingId::new())).await.unwrap();

        store
            .set_inventory_status(order.order().id, InventoryStatus::Applied)
            .await
            .unwrap();

        let pending = store.pending_inventory(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].id, order.order().id);
    }

    #[tokio::test]
    async fn unknown_order_status_update_fails() {
        let store = InMemoryOrderStore::new();
        assert_eq!(
            store
                .set_inventory_status(OrderId::new(42), InventoryStatus::Applied)
                .await,
            Err(StoreError::OrderNotFound(OrderId::new(42)))
        );
    }
}
