//! Event consumer loop with ack-after-processing.
//!
//! # Overview
//!
//! An [`EventConsumer`] subscribes to one or more topics and hands every
//! delivery to an [`EventHandler`]. The delivery is settled only after the
//! handler returns:
//!
//! ```text
//! ┌─────────────┐  Delivery   ┌───────────────┐
//! │  Event Bus  │────────────▶│ EventConsumer │
//! └─────────────┘             └───────┬───────┘
//!        ▲                            │ handle(&event)
//!        │                            ▼
//!        │                    ┌───────────────┐
//!        └── ack / nack ──────│ EventHandler  │
//!                             └───────────────┘
//! ```
//!
//! | Handler result            | Delivery |
//! |---------------------------|----------|
//! | `Ok(())`                  | ack      |
//! | `Err(Permanent)`          | ack, logged as an error |
//! | `Err(Retryable)`          | nack, redelivered after a pause |
//!
//! If the subscription fails or the stream ends, the consumer resubscribes
//! after `resubscribe_delay`. A shutdown signal stops the loop between
//! deliveries; a delivery already being handled is finished and settled first.

use crate::metrics::{CONSUMER_DELIVERIES, counter};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use ticketflow_core::event::SerializedEvent;
use ticketflow_core::event_bus::{Delivery, EventBus, EventStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Why a handler did not finish with an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Processing may succeed if the event is delivered again.
    #[error("Retryable failure: {0}")]
    Retryable(String),

    /// Processing will never succeed for this event.
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

/// Processes events read by an [`EventConsumer`].
///
/// Handlers must be idempotent: the same event can arrive more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] to tell the consumer how to settle the delivery.
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError>;
}

enum StreamEnd {
    Shutdown,
    Closed,
}

/// Subscription loop driving one [`EventHandler`].
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: watch::Receiver<bool>,
    resubscribe_delay: Duration,
    redelivery_delay: Duration,
}

impl EventConsumer {
    /// Create a consumer named `name` (used in logs and metrics).
    ///
    /// The loop stops once `true` is sent on the shutdown channel, or the
    /// sender is dropped.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: &[&str],
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
            event_bus,
            handler,
            shutdown,
            resubscribe_delay: Duration::from_secs(1),
            redelivery_delay: Duration::from_millis(200),
        }
    }

    /// Pause before resubscribing after a failed or closed subscription.
    #[must_use]
    pub const fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Pause after a nack before reading the next delivery.
    #[must_use]
    pub const fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Run the loop on a new task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        tracing::info!(consumer = %self.name, topics = ?self.topics, "Starting event consumer");

        while !self.stopping() {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
            match self.event_bus.subscribe(&topics).await {
                Ok(stream) => {
                    if let StreamEnd::Shutdown = self.process_stream(stream).await {
                        break;
                    }
                    tracing::warn!(consumer = %self.name, "Event stream closed, resubscribing");
                }
                Err(e) => {
                    tracing::error!(consumer = %self.name, error = %e, "Subscription failed");
                }
            }

            if self.pause(self.resubscribe_delay).await {
                break;
            }
        }

        tracing::info!(consumer = %self.name, "Event consumer stopped");
    }

    async fn process_stream(&mut self, mut stream: EventStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!(consumer = %self.name, "Shutdown signal received");
                        return StreamEnd::Shutdown;
                    }
                    continue;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if self.process_delivery(delivery).await
                        && self.pause(self.redelivery_delay).await
                    {
                        return StreamEnd::Shutdown;
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(
                        consumer = %self.name,
                        error = %e,
                        "Error receiving event from bus"
                    );
                }
                None => return StreamEnd::Closed,
            }
        }
    }

    /// Handle and settle one delivery. Returns `true` if it was nacked.
    async fn process_delivery(&self, delivery: Delivery) -> bool {
        let event_type = delivery.event.event_type.clone();
        let (result, nacked) = match self.handler.handle(&delivery.event).await {
            Ok(()) => {
                self.ack(delivery, &event_type);
                ("processed", false)
            }
            Err(HandlerError::Permanent(reason)) => {
                tracing::error!(
                    consumer = %self.name,
                    event_type = %event_type,
                    reason = %reason,
                    "Discarding event that cannot be processed"
                );
                self.ack(delivery, &event_type);
                ("discarded", false)
            }
            Err(HandlerError::Retryable(reason)) => {
                tracing::warn!(
                    consumer = %self.name,
                    event_type = %event_type,
                    reason = %reason,
                    "Event processing failed, returning for redelivery"
                );
                delivery.nack();
                ("redelivered", true)
            }
        };

        counter!(CONSUMER_DELIVERIES, "consumer" => self.name.clone(), "result" => result)
            .increment(1);
        nacked
    }

    fn ack(&self, delivery: Delivery, event_type: &str) {
        if let Err(e) = delivery.ack() {
            tracing::warn!(
                consumer = %self.name,
                event_type = %event_type,
                error = %e,
                "Acknowledgement failed, event may be redelivered"
            );
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `delay`, returning `true` early if shutdown was requested.
    async fn pause(&mut self, delay: Duration) -> bool {
        if delay.is_zero() {
            return self.stopping();
        }
        tokio::select! {
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
            () = tokio::time::sleep(delay) => self.stopping(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_errors_describe_themselves() {
        assert_eq!(
            HandlerError::Retryable("db down".to_string()).to_string(),
            "Retryable failure: db down"
        );
        assert_eq!(
            HandlerError::Permanent("bad json".to_string()).to_string(),
            "Permanent failure: bad json"
        );
    }
}
