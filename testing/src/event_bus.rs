//! In-memory event bus.
//!
//! Every subscription on an [`InMemoryEventBus`] belongs to the same consumer
//! group: subscribers share one queue per topic and each message is handed to
//! one of them at a time. A nacked (or dropped) delivery goes back to the front
//! of its queue, so it is the next message read.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use ticketflow_core::event::SerializedEvent;
use ticketflow_core::event_bus::{Acknowledger, Delivery, EventBus, EventBusError, EventStream};
use tokio::sync::Notify;

#[derive(Clone, Debug)]
struct Message {
    key: Option<String>,
    event: SerializedEvent,
}

#[derive(Default)]
struct TopicState {
    queue: VecDeque<Message>,
    published: Vec<Message>,
    in_flight: usize,
    acked: usize,
    nacked: usize,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, TopicState>>,
    notify: Notify,
    fail_publishes: AtomicBool,
    closed: AtomicBool,
}

impl Inner {
    fn next_message(&self, topics: &[String]) -> Option<(String, Message)> {
        let mut state = self.topics.lock().unwrap();
        for topic in topics {
            if let Some(topic_state) = state.get_mut(topic) {
                if let Some(message) = topic_state.queue.pop_front() {
                    topic_state.in_flight += 1;
                    return Some((topic.clone(), message));
                }
            }
        }
        None
    }
}

/// Shared-queue event bus for tests and local runs.
///
/// # Example
///
/// ```
/// use ticketflow_testing::InMemoryEventBus;
/// use ticketflow_core::event::SerializedEvent;
/// use ticketflow_core::event_bus::EventBus;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe(&["booking"]).await?;
///
/// let event = SerializedEvent::new("BookingPlaced.v1".to_string(), b"{}".to_vec(), None);
/// bus.publish("booking", Some("5"), &event).await?;
///
/// if let Some(Ok(delivery)) = stream.next().await {
///     delivery.ack()?;
/// }
/// assert_eq!(bus.pending("booking"), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.inner.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// End every open subscription stream and refuse new subscriptions.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Every event ever published on `topic`, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<SerializedEvent> {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|t| t.published.iter().map(|m| m.event.clone()).collect())
            .unwrap_or_default()
    }

    /// Partition keys of the events published on `topic`, in publish order.
    #[must_use]
    pub fn published_keys(&self, topic: &str) -> Vec<Option<String>> {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|t| t.published.iter().map(|m| m.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages on `topic` not yet acknowledged (queued or in flight).
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |t| t.queue.len() + t.in_flight)
    }

    /// Number of acknowledgements recorded on `topic`.
    #[must_use]
    pub fn acked(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |t| t.acked)
    }

    /// Number of nacks (explicit or by drop) recorded on `topic`.
    #[must_use]
    pub fn nacked(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |t| t.nacked)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: Option<&'a str>,
        event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            if self.inner.fail_publishes.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "publishing disabled".to_string(),
                });
            }

            let message = Message {
                key: key.map(str::to_string),
                event: event.clone(),
            };
            {
                let mut topics = self.inner.topics.lock().unwrap();
                let state = topics.entry(topic.to_string()).or_default();
                state.published.push(message.clone());
                state.queue.push_back(message);
            }
            self.inner.notify.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            if inner.closed.load(Ordering::SeqCst) {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "bus closed".to_string(),
                });
            }

            let stream = async_stream::stream! {
                while !inner.closed.load(Ordering::SeqCst) {
                    let notified = inner.notify.notified();
                    if let Some((topic, message)) = inner.next_message(&topics) {
                        let acknowledger = InMemoryAcknowledger {
                            inner: Arc::clone(&inner),
                            topic: topic.clone(),
                            message: Some(message.clone()),
                        };
                        yield Ok::<Delivery, EventBusError>(Delivery::new(
                            topic,
                            message.key,
                            message.event,
                            Box::new(acknowledger),
                        ));
                        continue;
                    }
                    notified.await;
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}

struct InMemoryAcknowledger {
    inner: Arc<Inner>,
    topic: String,
    message: Option<Message>,
}

impl Acknowledger for InMemoryAcknowledger {
    fn ack(self: Box<Self>) -> Result<(), EventBusError> {
        let mut topics = self.inner.topics.lock().unwrap();
        if let Some(state) = topics.get_mut(&self.topic) {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.acked += 1;
        }
        Ok(())
    }

    fn nack(mut self: Box<Self>) {
        {
            let mut topics = self.inner.topics.lock().unwrap();
            if let Some(state) = topics.get_mut(&self.topic) {
                state.in_flight = state.in_flight.saturating_sub(1);
                state.nacked += 1;
                if let Some(message) = self.message.take() {
                    state.queue.push_front(message);
                }
            }
        }
        self.inner.notify.notify_waiters();
    }
}
