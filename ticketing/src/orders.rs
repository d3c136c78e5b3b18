//! Order workflow: turn a booking event into an order and decrement inventory.
//!
//! # Steps
//!
//! 1. Insert the order if no order exists for the booking yet.
//! 2. Decrement inventory, keyed by the booking id.
//! 3. Record the outcome on the order's `inventory_status`.
//!
//! # Redelivery
//!
//! | Stored order       | What a redelivered event does |
//! |--------------------|-------------------------------|
//! | none               | full run                      |
//! | `Pending`          | resumes at step 2             |
//! | `Applied`/`Rejected` | nothing                     |
//!
//! A decrement that still fails after retries leaves the order `Pending`; the
//! [`InventoryReconciler`](crate::reconciler::InventoryReconciler) picks it up.
//! Because the decrement is keyed, running step 2 again never decrements twice.

use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ticketflow_core::booking::BookingEvent;
use ticketflow_core::environment::Clock;
use ticketflow_core::error::OrderError;
use ticketflow_core::event::SerializedEvent;
use ticketflow_core::inventory::{DecrementOutcome, InventoryError, InventoryUpdate};
use ticketflow_core::order::{
    InventoryStatus, NewOrder, Order, OrderStore, SaveOutcome, StoreError,
};
use ticketflow_runtime::metrics::{
    INVENTORY_DECREMENTS, ORDERS_CREATED, ORDERS_DUPLICATE, record_workflow,
};
use ticketflow_runtime::{
    EventHandler, HandlerError, RetryPolicy, bounded, retry_with_predicate,
};

use crate::booking::DEFAULT_CALL_TIMEOUT;

/// Creates orders from booking events and applies their inventory decrement.
pub struct OrderWorkflow {
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryUpdate>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl OrderWorkflow {
    /// Create a workflow with the default retry policy and call timeout.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryUpdate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            inventory,
            clock,
            retry: RetryPolicy::builder().build(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Backoff for transient decrement failures.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound each store and inventory call by `timeout`.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Process one booking event. Safe to call again with the same event.
    ///
    /// Returns the order as stored after this run.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Decode`] if the event has no tickets or a negative
    ///   total; nothing is written
    /// - [`OrderError::PersistFailure`] if the order (or its status) could not
    ///   be written; the event should be redelivered unless the store refused
    ///   the record
    /// - [`OrderError::InventoryUpdateFailure`] if the decrement kept failing;
    ///   the order stays `Pending`
    #[tracing::instrument(
        skip(self, event),
        fields(booking_id = %event.booking_id, event_id = %event.event_id)
    )]
    pub async fn handle(&self, event: &BookingEvent) -> Result<Order, OrderError> {
        let started = Instant::now();
        let result = self.process(event).await;
        record_workflow("order", started.elapsed());
        result
    }

    async fn process(&self, event: &BookingEvent) -> Result<Order, OrderError> {
        event.validate()?;
        let new_order = NewOrder::from_booking(event, self.clock.now());
        let saved = self
            .store_call(self.orders.save(new_order))
            .await
            .map_err(|source| OrderError::PersistFailure {
                booking_id: event.booking_id,
                source,
            })?;

        let order = match saved {
            SaveOutcome::Created(order) => {
                counter!(ORDERS_CREATED).increment(1);
                tracing::info!(
                    order_id = %order.id,
                    tickets = order.ticket_count,
                    total_price = %order.total_price,
                    "Order created"
                );
                order
            }
            SaveOutcome::Existing(order) if order.inventory_status.is_settled() => {
                counter!(ORDERS_DUPLICATE).increment(1);
                tracing::debug!(
                    order_id = %order.id,
                    status = %order.inventory_status,
                    "Order already settled, ignoring redelivery"
                );
                return Ok(order);
            }
            SaveOutcome::Existing(order) => {
                tracing::info!(order_id = %order.id, "Resuming pending order");
                order
            }
        };

        self.apply_inventory(order).await
    }

    /// Decrement inventory for a `Pending` order and record the outcome.
    ///
    /// Used by [`OrderWorkflow::handle`] and by the reconciler. Transient
    /// failures are retried with backoff; an event without enough capacity
    /// (or no longer known) makes the order `Rejected`.
    ///
    /// # Errors
    ///
    /// - [`OrderError::InventoryUpdateFailure`] when retries are exhausted; the
    ///   order is left `Pending`
    /// - [`OrderError::PersistFailure`] when the new status cannot be written
    pub async fn apply_inventory(&self, mut order: Order) -> Result<Order, OrderError> {
        let result = retry_with_predicate(
            &self.retry,
            || {
                bounded(
                    self.call_timeout,
                    self.inventory.decrement_capacity(
                        order.event_id,
                        order.ticket_count,
                        order.booking_id,
                    ),
                    InventoryError::Timeout,
                )
            },
            InventoryError::is_transient,
        )
        .await;

        let status = match result {
            Ok(DecrementOutcome::Applied { remaining }) => {
                counter!(INVENTORY_DECREMENTS, "outcome" => "applied").increment(1);
                tracing::info!(order_id = %order.id, remaining, "Inventory decremented");
                InventoryStatus::Applied
            }
            Ok(DecrementOutcome::AlreadyApplied) => {
                counter!(INVENTORY_DECREMENTS, "outcome" => "already_applied").increment(1);
                tracing::debug!(order_id = %order.id, "Inventory decrement already applied");
                InventoryStatus::Applied
            }
            Err(
                e @ (InventoryError::InsufficientCapacity { .. }
                | InventoryError::EventNotFound(_)),
            ) => {
                counter!(INVENTORY_DECREMENTS, "outcome" => "rejected").increment(1);
                tracing::warn!(order_id = %order.id, error = %e, "Inventory decrement rejected");
                InventoryStatus::Rejected
            }
            Err(source) => {
                counter!(INVENTORY_DECREMENTS, "outcome" => "failed").increment(1);
                tracing::warn!(
                    order_id = %order.id,
                    error = %source,
                    "Inventory decrement failed, order left pending"
                );
                return Err(OrderError::InventoryUpdateFailure {
                    order_id: order.id,
                    source,
                });
            }
        };

        self.store_call(self.orders.set_inventory_status(order.id, status))
            .await
            .map_err(|source| OrderError::PersistFailure {
                booking_id: order.booking_id,
                source,
            })?;

        order.inventory_status = status;
        Ok(order)
    }

    async fn store_call<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        bounded(self.call_timeout, call, |after| {
            StoreError::ConnectionFailed(format!("Order store call timed out after {after:?}"))
        })
        .await
    }
}

/// Bridges the [`EventConsumer`](ticketflow_runtime::EventConsumer) to the
/// [`OrderWorkflow`].
///
/// | Outcome                    | Settlement |
/// |----------------------------|------------|
/// | order handled              | ack        |
/// | undecodable or invalid payload | ack (poison, logged) |
/// | store refused the order    | ack (poison, logged) |
/// | order could not be written | nack       |
/// | inventory still failing    | ack, reconciler retries |
pub struct OrderEventHandler {
    workflow: Arc<OrderWorkflow>,
}

impl OrderEventHandler {
    /// Wrap a workflow.
    #[must_use]
    pub const fn new(workflow: Arc<OrderWorkflow>) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl EventHandler for OrderEventHandler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let booking: BookingEvent = event.decode(BookingEvent::EVENT_TYPE).map_err(|e| {
            let err = OrderError::from(e);
            tracing::error!(error = %err, event = %event, "Discarding undecodable booking event");
            HandlerError::Permanent(err.to_string())
        })?;

        match self.workflow.handle(&booking).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_redeliverable() => Err(HandlerError::Retryable(e.to_string())),
            Err(OrderError::InventoryUpdateFailure { order_id, source }) => {
                tracing::warn!(
                    %order_id,
                    error = %source,
                    "Order persisted with pending inventory, leaving it to the reconciler"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, event = %event, "Discarding booking event");
                Err(HandlerError::Permanent(e.to_string()))
            }
        }
    }
}
