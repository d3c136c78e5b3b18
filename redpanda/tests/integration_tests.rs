//! Integration tests for [`RedpandaEventBus`] with a real Kafka instance.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they require
//! Docker (for testcontainers) and take a while to spin up Kafka.
//!
//! ```bash
//! cargo test -p ticketflow-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use ticketflow_core::event::SerializedEvent;
use ticketflow_core::event_bus::{Delivery, EventBus, EventStream};
use ticketflow_redpanda::RedpandaEventBus;

fn test_event(data: &[u8]) -> SerializedEvent {
    SerializedEvent::new(
        "BookingPlaced.v1".to_string(),
        data.to_vec(),
        Some(serde_json::json!({"producer": "booking"})),
    )
}

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn event_bus(brokers: &str, group: &str) -> RedpandaEventBus {
    RedpandaEventBus::builder()
        .brokers(brokers)
        .consumer_group(group)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus")
}

/// Publish until the topic is auto-created and accepts writes.
async fn ensure_topic_exists(bus: &RedpandaEventBus, topic: &str) {
    let warmup = SerializedEvent::new("Warmup".to_string(), vec![0], None);
    for attempt in 1..=60 {
        if bus.publish(topic, None, &warmup).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

/// Next delivery that is not a warmup record.
async fn next_booking(stream: &mut EventStream) -> Delivery {
    loop {
        let delivery = tokio::time::timeout(Duration::from_secs(30), stream.next())
            .await
            .expect("Timed out waiting for delivery")
            .expect("Stream ended")
            .expect("Delivery failed");
        if delivery.event.event_type == "Warmup" {
            delivery.ack().expect("ack warmup");
            continue;
        }
        return delivery;
    }
}

#[tokio::test]
#[ignore]
async fn test_round_trip_keeps_key_type_and_metadata() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = event_bus(&brokers, "round-trip");
    ensure_topic_exists(&bus, "booking").await;

    let mut stream = bus.subscribe(&["booking"]).await.expect("subscribe");
    let event = test_event(b"{\"ticketCount\":3}");
    bus.publish("booking", Some("5"), &event)
        .await
        .expect("publish");

    let delivery = next_booking(&mut stream).await;
    assert_eq!(delivery.key.as_deref(), Some("5"));
    assert_eq!(delivery.event, event);
    delivery.ack().expect("ack");
}

#[tokio::test]
#[ignore]
async fn test_nacked_delivery_is_redelivered_and_acked_one_is_not() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = event_bus(&brokers, "order-booking-group");
    ensure_topic_exists(&bus, "booking").await;

    let mut stream = bus.subscribe(&["booking"]).await.expect("subscribe");
    bus.publish("booking", Some("5"), &test_event(b"first"))
        .await
        .expect("publish");
    bus.publish("booking", Some("5"), &test_event(b"second"))
        .await
        .expect("publish");

    let first = next_booking(&mut stream).await;
    assert_eq!(first.event.data, b"first");
    first.nack();

    let again = next_booking(&mut stream).await;
    assert_eq!(again.event.data, b"first");
    again.ack().expect("ack");

    let second = next_booking(&mut stream).await;
    assert_eq!(second.event.data, b"second");
    second.ack().expect("ack");
    drop(stream);

    // Give the async commits time to land, then rejoin the group.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let mut rejoined = bus.subscribe(&["booking"]).await.expect("resubscribe");
    bus.publish("booking", Some("5"), &test_event(b"third"))
        .await
        .expect("publish");

    let next = next_booking(&mut rejoined).await;
    assert_eq!(next.event.data, b"third");
    next.ack().expect("ack");
}
