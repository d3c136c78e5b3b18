//! Event channel abstraction.
//!
//! This module provides the [`EventBus`] trait for publishing booking events and
//! consuming them with explicit acknowledgement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Booking workflow │
//! └────────┬─────────┘
//!          │ publish(topic, key = event id)
//!          ▼
//! ┌──────────────────┐
//! │    Event Bus     │◄─── At-least-once delivery
//! └────────┬─────────┘
//!          │ Delivery
//!          ▼
//! ┌──────────────────┐
//! │  Order workflow  │── ack() ──▶ offset committed
//! │                  │── nack() ─▶ redelivered
//! └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: Events may be delivered multiple times
//! - **Ack after processing**: A [`Delivery`] is acknowledged only once the
//!   subscriber has finished with it; dropping it unacknowledged is a nack
//! - **Idempotency**: Subscribers must handle duplicate events
//! - **Ordered within partition**: Events published with the same key keep their order
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `ticketflow-testing` - For tests and local runs
//! - `RedpandaEventBus` in `ticketflow-redpanda` - For production (Kafka-compatible)

use crate::event::SerializedEvent;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Failed to acknowledge a delivery
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Settles a single delivery with the transport.
///
/// Implemented by each event bus; [`Delivery`] owns one and calls it exactly once.
pub trait Acknowledger: Send {
    /// Mark the delivery as processed. It will not be delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::AckFailed`] if the transport could not record it.
    fn ack(self: Box<Self>) -> Result<(), EventBusError>;

    /// Return the delivery to the transport for redelivery.
    fn nack(self: Box<Self>);
}

/// One event handed to a subscriber.
///
/// Dropping a `Delivery` without calling [`Delivery::ack`] has the same effect as
/// [`Delivery::nack`]: the event is redelivered.
pub struct Delivery {
    /// Topic the event was read from
    pub topic: String,
    /// Partition key the event was published with
    pub key: Option<String>,
    /// The event itself
    pub event: SerializedEvent,
    acknowledger: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    /// Wrap an event with the transport's acknowledger.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        key: Option<String>,
        event: SerializedEvent,
        acknowledger: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key,
            event,
            acknowledger: Some(acknowledger),
        }
    }

    /// Acknowledge successful processing.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::AckFailed`] if the transport rejected the
    /// acknowledgement; the event may then be redelivered.
    pub fn ack(mut self) -> Result<(), EventBusError> {
        match self.acknowledger.take() {
            Some(acknowledger) => acknowledger.ack(),
            None => Ok(()),
        }
    }

    /// Reject the delivery so it is redelivered.
    pub fn nack(mut self) {
        if let Some(acknowledger) = self.acknowledger.take() {
            acknowledger.nack();
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acknowledger) = self.acknowledger.take() {
            acknowledger.nack();
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("event", &self.event)
            .field("settled", &self.acknowledger.is_none())
            .finish()
    }
}

/// Stream of deliveries from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Consumer Groups
///
/// Implementations bind subscriptions to a consumer group: every instance
/// subscribed with the same group shares the topic's events, and each event
/// goes to one member at a time.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn EventBus>`).
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// `key` selects the partition; events with the same key keep their order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: Option<&'a str>,
        event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;

    /// Subscribe to one or more topics and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<&'static str>>>);

    impl Acknowledger for Recorder {
        fn ack(self: Box<Self>) -> Result<(), EventBusError> {
            if let Ok(mut calls) = self.0.lock() {
                calls.push("ack");
            }
            Ok(())
        }

        fn nack(self: Box<Self>) {
            if let Ok(mut calls) = self.0.lock() {
                calls.push("nack");
            }
        }
    }

    fn delivery(calls: &Arc<Mutex<Vec<&'static str>>>) -> Delivery {
        Delivery::new(
            "booking",
            Some("5".to_string()),
            SerializedEvent::new("BookingPlaced.v1".to_string(), vec![], None),
            Box::new(Recorder(Arc::clone(calls))),
        )
    }

    fn recorded(calls: &Arc<Mutex<Vec<&'static str>>>) -> Vec<&'static str> {
        calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    #[test]
    fn ack_settles_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        assert!(delivery(&calls).ack().is_ok());
        assert_eq!(recorded(&calls), vec!["ack"]);
    }

    #[test]
    fn dropping_unsettled_delivery_nacks() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        drop(delivery(&calls));
        assert_eq!(recorded(&calls), vec!["nack"]);
    }

    #[test]
    fn explicit_nack_is_not_repeated_on_drop() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        delivery(&calls).nack();
        assert_eq!(recorded(&calls), vec!["nack"]);
    }
}
