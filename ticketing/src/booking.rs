//! Booking workflow: validate a request and publish a booking event.
//!
//! ```text
//! request ─▶ customer lookup ─▶ inventory snapshot ─▶ price ─▶ publish ─▶ confirmation
//! ```
//!
//! Capacity is checked here but not held. The decrement happens later, in the
//! order workflow, so two bookings that each fit the snapshot can still exceed
//! capacity together; the inventory service rejects the second decrement.

use metrics::counter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ticketflow_core::BOOKING_TOPIC;
use ticketflow_core::booking::{BookingConfirmation, BookingEvent, BookingRequest, total_price};
use ticketflow_core::customer::{Customer, CustomerDirectory};
use ticketflow_core::environment::Clock;
use ticketflow_core::error::BookingError;
use ticketflow_core::event::SerializedEvent;
use ticketflow_core::event_bus::EventBus;
use ticketflow_core::inventory::{InventoryError, InventoryQuery, InventorySnapshot};
use ticketflow_core::types::BookingId;
use ticketflow_runtime::bounded;
use ticketflow_runtime::metrics::{BOOKINGS_CREATED, BOOKINGS_REJECTED, record_workflow};

/// Default bound on each collaborator call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

fn inventory_failure(err: InventoryError) -> BookingError {
    match err {
        InventoryError::EventNotFound(event_id) => BookingError::EventNotFound(event_id),
        InventoryError::InsufficientCapacity {
            event_id,
            requested,
            available,
        } => BookingError::InsufficientInventory {
            event_id,
            requested,
            available,
        },
        InventoryError::Unavailable(reason) => BookingError::Unavailable {
            dependency: "inventory",
            reason,
        },
        InventoryError::Timeout(after) => BookingError::Timeout {
            operation: "inventory query",
            after,
        },
    }
}

/// Accepts booking requests and publishes one [`BookingEvent`] per success.
///
/// Every collaborator is injected; nothing is looked up globally.
pub struct BookingWorkflow {
    customers: Arc<dyn CustomerDirectory>,
    inventory: Arc<dyn InventoryQuery>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    topic: String,
    call_timeout: Duration,
}

impl BookingWorkflow {
    /// Create a workflow publishing to the `booking` topic.
    #[must_use]
    pub fn new(
        customers: Arc<dyn CustomerDirectory>,
        inventory: Arc<dyn InventoryQuery>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            customers,
            inventory,
            event_bus,
            clock,
            topic: BOOKING_TOPIC.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Publish to `topic` instead of `booking`.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Bound each collaborator call by `timeout`.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Validate `request`, publish a booking event and return its confirmation.
    ///
    /// The customer is resolved before inventory is read, and nothing is
    /// published unless every check passes. Returning `Ok` means the event was
    /// handed to the channel; the order is created asynchronously.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidTicketCount`] for a ticket count of zero
    /// - [`BookingError::CustomerNotFound`] / [`BookingError::EventNotFound`]
    /// - [`BookingError::InsufficientInventory`] when the snapshot is too small
    /// - [`BookingError::Unavailable`] / [`BookingError::Timeout`] when a lookup fails
    /// - [`BookingError::PublishFailure`] when the channel refuses the event
    #[tracing::instrument(
        skip(self),
        fields(
            user_id = %request.user_id,
            event_id = %request.event_id,
            tickets = request.ticket_count
        )
    )]
    pub async fn create_booking(
        &self,
        request: BookingRequest,
    ) -> Result<BookingConfirmation, BookingError> {
        let started = Instant::now();
        let result = self.place(&request).await;
        record_workflow("booking", started.elapsed());

        match &result {
            Ok(confirmation) => {
                counter!(BOOKINGS_CREATED).increment(1);
                tracing::info!(
                    booking_id = %confirmation.booking_id,
                    total_price = %confirmation.total_price,
                    "Booking published"
                );
            }
            Err(e) => {
                counter!(BOOKINGS_REJECTED, "reason" => e.kind()).increment(1);
                if e.is_client_error() {
                    tracing::info!(error = %e, "Booking refused");
                } else {
                    tracing::warn!(error = %e, "Booking failed");
                }
            }
        }
        result
    }

    async fn place(&self, request: &BookingRequest) -> Result<BookingConfirmation, BookingError> {
        if request.ticket_count == 0 {
            return Err(BookingError::InvalidTicketCount(request.ticket_count));
        }

        let customer = self.find_customer(request).await?;
        tracing::debug!(customer = %customer.name, "Customer resolved");

        let snapshot = self.snapshot(request).await?;
        if snapshot.capacity < u64::from(request.ticket_count) {
            return Err(BookingError::InsufficientInventory {
                event_id: request.event_id,
                requested: request.ticket_count,
                available: snapshot.capacity,
            });
        }

        let event = BookingEvent {
            booking_id: BookingId::new(),
            user_id: customer.id,
            event_id: request.event_id,
            ticket_count: request.ticket_count,
            total_price: total_price(snapshot.ticket_price, request.ticket_count),
            placed_at: Some(self.clock.now()),
        };
        self.publish(&event).await?;

        Ok(BookingConfirmation::from(&event))
    }

    async fn find_customer(&self, request: &BookingRequest) -> Result<Customer, BookingError> {
        let found = bounded(
            self.call_timeout,
            async {
                self.customers
                    .find_by_id(request.user_id)
                    .await
                    .map_err(|e| BookingError::Unavailable {
                        dependency: "customer directory",
                        reason: e.to_string(),
                    })
            },
            |after| BookingError::Timeout {
                operation: "customer lookup",
                after,
            },
        )
        .await?;

        found.ok_or(BookingError::CustomerNotFound(request.user_id))
    }

    async fn snapshot(&self, request: &BookingRequest) -> Result<InventorySnapshot, BookingError> {
        bounded(
            self.call_timeout,
            async {
                self.inventory
                    .get_inventory(request.event_id)
                    .await
                    .map_err(inventory_failure)
            },
            |after| BookingError::Timeout {
                operation: "inventory query",
                after,
            },
        )
        .await
    }

    async fn publish(&self, event: &BookingEvent) -> Result<(), BookingError> {
        let metadata = serde_json::json!({ "correlation_id": event.booking_id.to_string() });
        let serialized = SerializedEvent::from_event(event, Some(metadata))?;
        // Keyed by event so bookings of one event stay ordered on one partition.
        let key = event.event_id.to_string();

        bounded(
            self.call_timeout,
            async {
                self.event_bus
                    .publish(&self.topic, Some(key.as_str()), &serialized)
                    .await
                    .map_err(BookingError::from)
            },
            |after| BookingError::Timeout {
                operation: "publish",
                after,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rust_decimal_macros::dec;
    use ticketflow_core::types::{CustomerId, EventId};
    use ticketflow_testing::{
        InMemoryCustomerDirectory, InMemoryEventBus, InMemoryInventory, test_clock,
    };

    fn workflow(inventory: &InMemoryInventory, bus: &InMemoryEventBus) -> BookingWorkflow {
        let customers = InMemoryCustomerDirectory::new().with_customer(
            CustomerId::new(1),
            "Ada",
            "ada@example.com",
        );
        BookingWorkflow::new(
            Arc::new(customers),
            Arc::new(inventory.clone()),
            Arc::new(bus.clone()),
            Arc::new(test_clock()),
        )
    }

    #[tokio::test]
    async fn zero_tickets_is_refused_before_any_lookup() {
        let inventory = InMemoryInventory::new();
        inventory.fail_next_queries(1);
        let bus = InMemoryEventBus::new();

        let result = workflow(&inventory, &bus)
            .create_booking(BookingRequest::new(CustomerId::new(1), EventId::new(5), 0))
            .await;

        assert_eq!(result, Err(BookingError::InvalidTicketCount(0)));
        assert!(bus.published(BOOKING_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn event_is_keyed_by_event_id_and_stamped_with_the_clock() {
        let inventory =
            InMemoryInventory::new().with_event(EventId::new(5), "Concert", 10, dec!(10.00));
        let bus = InMemoryEventBus::new();

        let confirmation = workflow(&inventory, &bus)
            .create_booking(BookingRequest::new(CustomerId::new(1), EventId::new(5), 3))
            .await
            .unwrap();

        assert_eq!(bus.published_keys(BOOKING_TOPIC), vec![Some("5".to_string())]);
        let published: BookingEvent = bus.published(BOOKING_TOPIC)[0]
            .decode(BookingEvent::EVENT_TYPE)
            .unwrap();
        assert_eq!(published.booking_id, confirmation.booking_id);
        assert_eq!(published.placed_at, Some(test_clock().now()));
    }

    #[tokio::test]
    async fn custom_topic_is_honoured() {
        let inventory =
            InMemoryInventory::new().with_event(EventId::new(5), "Concert", 10, dec!(10.00));
        let bus = InMemoryEventBus::new();

        workflow(&inventory, &bus)
            .with_topic("booking-staging")
            .create_booking(BookingRequest::new(CustomerId::new(1), EventId::new(5), 1))
            .await
            .unwrap();

        assert_eq!(bus.published("booking-staging").len(), 1);
        assert!(bus.published(BOOKING_TOPIC).is_empty());
    }

    #[test]
    fn inventory_errors_map_to_booking_errors() {
        assert_eq!(
            inventory_failure(InventoryError::EventNotFound(EventId::new(9))),
            BookingError::EventNotFound(EventId::new(9))
        );
        assert_eq!(
            inventory_failure(InventoryError::Timeout(Duration::from_secs(1))).kind(),
            "timeout"
        );
        assert_eq!(
            inventory_failure(InventoryError::Unavailable("503".to_string())).kind(),
            "unavailable"
        );
    }
}
