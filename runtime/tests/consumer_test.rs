//! Consumer loop settlement and shutdown behaviour against the in-memory bus.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticketflow_core::event::SerializedEvent;
use ticketflow_core::event_bus::EventBus;
use ticketflow_runtime::{EventConsumer, EventHandler, HandlerError};
use ticketflow_testing::InMemoryEventBus;
use tokio::sync::watch;

const TOPIC: &str = "booking";

/// Replays scripted results, then succeeds.
#[derive(Default)]
struct ScriptedHandler {
    script: Mutex<VecDeque<Result<(), HandlerError>>>,
    seen: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedHandler {
    fn with_script(results: Vec<Result<(), HandlerError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            seen: Mutex::default(),
        }
    }

    fn seen(&self) -> Vec<Vec<u8>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(event.data.clone());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

fn event(n: u8) -> SerializedEvent {
    SerializedEvent::new("BookingPlaced.v1".to_string(), vec![n], None)
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

fn consumer(
    bus: &InMemoryEventBus,
    handler: &Arc<ScriptedHandler>,
) -> (EventConsumer, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = EventConsumer::new(
        "test-consumer",
        &[TOPIC],
        Arc::new(bus.clone()),
        Arc::clone(handler) as Arc<dyn EventHandler>,
        shutdown_rx,
    )
    .with_redelivery_delay(Duration::from_millis(1))
    .with_resubscribe_delay(Duration::from_millis(1));
    (consumer, shutdown_tx)
}

#[tokio::test]
async fn successful_events_are_acknowledged() {
    let bus = InMemoryEventBus::new();
    let handler = Arc::new(ScriptedHandler::default());
    let (consumer, shutdown) = consumer(&bus, &handler);
    let task = consumer.spawn();

    bus.publish(TOPIC, Some("5"), &event(1)).await.unwrap();
    bus.publish(TOPIC, Some("5"), &event(2)).await.unwrap();

    wait_until(|| bus.acked(TOPIC) == 2).await;
    assert_eq!(bus.pending(TOPIC), 0);
    assert_eq!(handler.seen(), vec![vec![1], vec![2]]);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn retryable_failures_are_redelivered_until_they_succeed() {
    let bus = InMemoryEventBus::new();
    let handler = Arc::new(ScriptedHandler::with_script(vec![
        Err(HandlerError::Retryable("db down".to_string())),
        Err(HandlerError::Retryable("db down".to_string())),
    ]));
    let (consumer, shutdown) = consumer(&bus, &handler);
    let task = consumer.spawn();

    bus.publish(TOPIC, None, &event(7)).await.unwrap();

    wait_until(|| bus.acked(TOPIC) == 1).await;
    assert_eq!(bus.nacked(TOPIC), 2);
    assert_eq!(handler.seen(), vec![vec![7], vec![7], vec![7]]);
    assert_eq!(bus.pending(TOPIC), 0);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn permanent_failures_are_acknowledged_and_not_retried() {
    let bus = InMemoryEventBus::new();
    let handler = Arc::new(ScriptedHandler::with_script(vec![Err(
        HandlerError::Permanent("garbage".to_string()),
    )]));
    let (consumer, shutdown) = consumer(&bus, &handler);
    let task = consumer.spawn();

    bus.publish(TOPIC, None, &event(1)).await.unwrap();
    bus.publish(TOPIC, None, &event(2)).await.unwrap();

    wait_until(|| bus.acked(TOPIC) == 2).await;
    assert_eq!(bus.nacked(TOPIC), 0);
    assert_eq!(handler.seen(), vec![vec![1], vec![2]]);

    shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_an_idle_consumer() {
    let bus = InMemoryEventBus::new();
    let handler = Arc::new(ScriptedHandler::default());
    let (consumer, shutdown) = consumer(&bus, &handler);
    let task = consumer.spawn();

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    bus.publish(TOPIC, None, &event(1)).await.unwrap();
    assert_eq!(bus.pending(TOPIC), 1);
    assert!(handler.seen().is_empty());
}
