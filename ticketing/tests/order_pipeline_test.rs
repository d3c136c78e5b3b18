//! Booking to order, through the event channel, against in-memory collaborators.

#![allow(clippy::unwrap_used)]

use futures::future::join_all;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use ticketflow_core::BOOKING_TOPIC;
use ticketflow_core::booking::{BookingEvent, BookingRequest};
use ticketflow_core::event::SerializedEvent;
use ticketflow_core::event_bus::EventBus;
use ticketflow_core::order::InventoryStatus;
use ticketflow_core::types::{CustomerId, EventId};
use ticketflow_runtime::{EventConsumer, RetryPolicy};
use ticketflow_testing::helpers::{booking_event, init_tracing, serialized};
use ticketflow_testing::{
    InMemoryCustomerDirectory, InMemoryEventBus, InMemoryInventory, InMemoryOrderStore,
    test_clock,
};
use ticketing::{BookingWorkflow, InventoryReconciler, OrderEventHandler, OrderWorkflow};
use tokio::sync::watch;

struct Pipeline {
    bus: InMemoryEventBus,
    inventory: InMemoryInventory,
    orders: InMemoryOrderStore,
    workflow: Arc<OrderWorkflow>,
}

impl Pipeline {
    fn new(capacity: u64) -> Self {
        init_tracing();
        let inventory =
            InMemoryInventory::new().with_event(EventId::new(5), "Concert", capacity, dec!(10.00));
        let orders = InMemoryOrderStore::new();
        let workflow = Arc::new(
            OrderWorkflow::new(
                Arc::new(orders.clone()),
                Arc::new(inventory.clone()),
                Arc::new(test_clock()),
            )
            .with_retry_policy(
                RetryPolicy::builder()
                    .max_retries(1)
                    .initial_delay(Duration::from_millis(1))
                    .build(),
            ),
        );

        Self {
            bus: InMemoryEventBus::new(),
            inventory,
            orders,
            workflow,
        }
    }

    fn booking_workflow(&self) -> BookingWorkflow {
        let customers = InMemoryCustomerDirectory::new()
            .with_customer(CustomerId::new(1), "Ada", "ada@example.com")
            .with_customer(CustomerId::new(2), "Grace", "grace@example.com");
        BookingWorkflow::new(
            Arc::new(customers),
            Arc::new(self.inventory.clone()),
            Arc::new(self.bus.clone()),
            Arc::new(test_clock()),
        )
    }

    fn consumer(&self) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = EventConsumer::new(
            "order-service",
            &[BOOKING_TOPIC],
            Arc::new(self.bus.clone()),
            Arc::new(OrderEventHandler::new(Arc::clone(&self.workflow))),
            shutdown_rx,
        )
        .with_redelivery_delay(Duration::from_millis(1))
        .spawn();
        (task, shutdown_tx)
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn booking_flows_into_exactly_one_order() {
    let pipeline = Pipeline::new(10);
    let (consumer, shutdown) = pipeline.consumer();

    let confirmation = pipeline
        .booking_workflow()
        .create_booking(BookingRequest::new(CustomerId::new(1), EventId::new(5), 3))
        .await
        .unwrap();
    assert_eq!(confirmation.total_price, dec!(30.00));

    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 1).await;
    shutdown.send(true).unwrap();
    consumer.await.unwrap();

    let orders = pipeline.orders.orders();
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.booking_id, confirmation.booking_id);
    assert_eq!(order.customer_id, CustomerId::new(1));
    assert_eq!(order.event_id, EventId::new(5));
    assert_eq!(order.ticket_count, 3);
    assert_eq!(order.total_price, dec!(30.00));
    assert_eq!(order.inventory_status, InventoryStatus::Applied);

    assert_eq!(pipeline.inventory.decrement_calls(), 1);
    assert_eq!(pipeline.inventory.capacity(EventId::new(5)), Some(7));
}

#[tokio::test]
async fn redelivered_event_creates_one_order_and_one_decrement() {
    let pipeline = Pipeline::new(10);
    let event = booking_event(1, 5, 2, dec!(20.00));
    assert_eq!(event.total_price, dec!(40.00));

    let first = pipeline.workflow.handle(&event).await.unwrap();
    let second = pipeline.workflow.handle(&event).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.orders.orders()[0].ticket_count, 2);
    assert_eq!(pipeline.inventory.capacity(EventId::new(5)), Some(8));
    assert_eq!(pipeline.inventory.decrement_calls(), 1);
}

#[tokio::test]
async fn duplicate_publish_through_the_channel_is_absorbed() {
    let pipeline = Pipeline::new(10);
    let (consumer, shutdown) = pipeline.consumer();
    let event = serialized(&booking_event(1, 5, 2, dec!(20.00)));

    pipeline.bus.publish(BOOKING_TOPIC, Some("5"), &event).await.unwrap();
    pipeline.bus.publish(BOOKING_TOPIC, Some("5"), &event).await.unwrap();

    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 2).await;
    shutdown.send(true).unwrap();
    consumer.await.unwrap();

    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.inventory.capacity(EventId::new(5)), Some(8));
}

#[tokio::test]
async fn legacy_payload_without_booking_id_is_deduplicated() {
    let pipeline = Pipeline::new(10);
    let payload = SerializedEvent::new(
        BookingEvent::EVENT_TYPE.to_string(),
        br#"{"userId":1,"eventId":5,"ticketCount":2,"totalPrice":"40.00"}"#.to_vec(),
        None,
    );
    let (consumer, shutdown) = pipeline.consumer();

    pipeline.bus.publish(BOOKING_TOPIC, None, &payload).await.unwrap();
    pipeline.bus.publish(BOOKING_TOPIC, None, &payload).await.unwrap();

    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 2).await;
    shutdown.send(true).unwrap();
    consumer.await.unwrap();

    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.inventory.decrement_calls(), 1);
}

#[tokio::test]
async fn concurrent_orders_never_oversell() {
    let pipeline = Pipeline::new(5);
    let events: Vec<_> = (0..4).map(|user| booking_event(user, 5, 2, dec!(10.00))).collect();

    let results = join_all(events.iter().map(|e| pipeline.workflow.handle(e))).await;

    let orders: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    let applied = orders
        .iter()
        .filter(|o| o.inventory_status == InventoryStatus::Applied)
        .count();
    let rejected = orders
        .iter()
        .filter(|o| o.inventory_status == InventoryStatus::Rejected)
        .count();

    assert_eq!(applied, 2);
    assert_eq!(rejected, 2);
    assert_eq!(pipeline.inventory.capacity(EventId::new(5)), Some(1));
}

#[tokio::test]
async fn both_bookings_pass_the_snapshot_but_only_one_order_gets_the_tickets() {
    let pipeline = Pipeline::new(3);
    let booking = pipeline.booking_workflow();

    booking
        .create_booking(BookingRequest::new(CustomerId::new(1), EventId::new(5), 2))
        .await
        .unwrap();
    booking
        .create_booking(BookingRequest::new(CustomerId::new(2), EventId::new(5), 2))
        .await
        .unwrap();

    let (consumer, shutdown) = pipeline.consumer();
    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 2).await;
    shutdown.send(true).unwrap();
    consumer.await.unwrap();

    let statuses: Vec<_> = pipeline
        .orders
        .orders()
        .iter()
        .map(|o| o.inventory_status)
        .collect();
    assert_eq!(statuses, vec![InventoryStatus::Applied, InventoryStatus::Rejected]);
    assert_eq!(pipeline.inventory.capacity(EventId::new(5)), Some(1));
}

#[tokio::test]
async fn store_outage_is_redelivered_until_the_order_is_written() {
    let pipeline = Pipeline::new(10);
    pipeline.orders.fail_next_saves(2);
    let (consumer, shutdown) = pipeline.consumer();

    pipeline
        .bus
        .publish(BOOKING_TOPIC, Some("5"), &serialized(&booking_event(1, 5, 1, dec!(10.00))))
        .await
        .unwrap();

    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 1).await;
    shutdown.send(true).unwrap();
    consumer.await.unwrap();

    assert_eq!(pipeline.bus.nacked(BOOKING_TOPIC), 2);
    assert_eq!(pipeline.orders.save_calls(), 3);
    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.bus.pending(BOOKING_TOPIC), 0);
}

#[tokio::test]
async fn poison_payload_is_acknowledged_and_skipped() {
    let pipeline = Pipeline::new(10);
    let (consumer, shutdown) = pipeline.consumer();
    let garbage = SerializedEvent::new(
        BookingEvent::EVENT_TYPE.to_string(),
        b"{\"userId\":".to_vec(),
        None,
    );

    pipeline.bus.publish(BOOKING_TOPIC, None, &garbage).await.unwrap();
    pipeline
        .bus
        .publish(BOOKING_TOPIC, None, &serialized(&booking_event(1, 5, 1, dec!(10.00))))
        .await
        .unwrap();

    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 2).await;
    shutdown.send(true).unwrap();
    consumer.await.unwrap();

    assert_eq!(pipeline.bus.nacked(BOOKING_TOPIC), 0);
    assert_eq!(pipeline.orders.len(), 1);
}

#[tokio::test]
async fn zero_ticket_booking_is_acknowledged_without_an_order() {
    let pipeline = Pipeline::new(10);
    let (consumer, shutdown) = pipeline.consumer();
    let zero_tickets = SerializedEvent::new(
        BookingEvent::EVENT_TYPE.to_string(),
        br#"{"userId":1,"eventId":5,"ticketCount":0,"totalPrice":"0"}"#.to_vec(),
        None,
    );

    pipeline.bus.publish(BOOKING_TOPIC, Some("5"), &zero_tickets).await.unwrap();
    pipeline
        .bus
        .publish(BOOKING_TOPIC, Some("5"), &serialized(&booking_event(1, 5, 1, dec!(10.00))))
        .await
        .unwrap();

    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 2).await;
    shutdown.send(true).unwrap();
    consumer.await.unwrap();

    assert_eq!(pipeline.bus.nacked(BOOKING_TOPIC), 0);
    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.orders.orders()[0].ticket_count, 1);
    assert_eq!(pipeline.inventory.decrement_calls(), 1);
}

#[tokio::test]
async fn order_refused_by_the_store_does_not_block_the_partition() {
    let pipeline = Pipeline::new(10);
    pipeline.orders.reject_next_saves(1);
    let (consumer, shutdown) = pipeline.consumer();

    for tickets in [1, 2] {
        pipeline
            .bus
            .publish(
                BOOKING_TOPIC,
                Some("5"),
                &serialized(&booking_event(1, 5, tickets, dec!(10.00))),
            )
            .await
            .unwrap();
    }

    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 2).await;
    shutdown.send(true).unwrap();
    consumer.await.unwrap();

    assert_eq!(pipeline.bus.nacked(BOOKING_TOPIC), 0);
    assert_eq!(pipeline.orders.len(), 1);
    assert_eq!(pipeline.orders.orders()[0].ticket_count, 2);
    assert_eq!(pipeline.inventory.capacity(EventId::new(5)), Some(8));
}

#[tokio::test]
async fn reconciler_applies_a_pending_decrement_exactly_once() {
    let pipeline = Pipeline::new(10);
    pipeline.inventory.fail_next_decrements(2);
    let (consumer, shutdown) = pipeline.consumer();

    pipeline
        .bus
        .publish(BOOKING_TOPIC, Some("5"), &serialized(&booking_event(1, 5, 4, dec!(10.00))))
        .await
        .unwrap();

    wait_until(|| pipeline.bus.acked(BOOKING_TOPIC) == 1).await;
    assert_eq!(pipeline.bus.nacked(BOOKING_TOPIC), 0);
    assert_eq!(pipeline.orders.orders()[0].inventory_status, InventoryStatus::Pending);
    assert_eq!(pipeline.inventory.capacity(EventId::new(5)), Some(10));

    let reconciler = InventoryReconciler::new(
        Arc::new(pipeline.orders.clone()),
        Arc::clone(&pipeline.workflow),
        shutdown.subscribe(),
    );
    let first = reconciler.run_once().await.unwrap();
    let second = reconciler.run_once().await.unwrap();

    assert_eq!(first.applied, 1);
    assert_eq!(second.examined, 0);
    assert_eq!(pipeline.orders.orders()[0].inventory_status, InventoryStatus::Applied);
    assert_eq!(pipeline.inventory.capacity(EventId::new(5)), Some(6));

    shutdown.send(true).unwrap();
    consumer.await.unwrap();
}
