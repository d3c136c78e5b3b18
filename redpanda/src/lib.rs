//! Redpanda event bus for the booking pipeline.
//!
//! This crate provides a Redpanda-based event bus that implements the
//! [`EventBus`] trait from `ticketflow-core`. It uses rdkafka for
//! Kafka-compatible event streaming, so any Kafka-protocol broker works.
//!
//! # Record layout
//!
//! | Part              | Content                                   |
//! |-------------------|-------------------------------------------|
//! | key               | partition key given to `publish` (event id) |
//! | payload           | the event's JSON bytes                    |
//! | `event_type` header | e.g. `BookingPlaced.v1`                 |
//! | `metadata` header | JSON metadata, when present               |
//!
//! Records without an `event_type` header (written by other producers) are
//! delivered with an empty type.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Each subscription owns one consumer in the configured consumer group
//! - A record is handed out as a [`Delivery`] and the next record is not read
//!   until that delivery is settled
//! - `ack` commits the record's offset
//! - `nack` (or dropping the delivery) seeks the partition back to the record,
//!   so it is read again
//! - If the process crashes before commit, records will be redelivered
//! - Ordering is guaranteed within the same partition (same key)
//!
//! # Example
//!
//! ```no_run
//! use ticketflow_redpanda::RedpandaEventBus;
//! use ticketflow_core::event_bus::EventBus;
//! use ticketflow_core::event::SerializedEvent;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("order-booking-group")
//!     .build()?;
//!
//! let event = SerializedEvent::new("BookingPlaced.v1".to_string(), b"{}".to_vec(), None);
//! event_bus.publish("booking", Some("5"), &event).await?;
//!
//! let mut stream = event_bus.subscribe(&["booking"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(delivery) => delivery.ack()?,
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use ticketflow_core::event::SerializedEvent;
use ticketflow_core::event_bus::{Acknowledger, Delivery, EventBus, EventBusError, EventStream};
use tokio::sync::{mpsc, oneshot};

/// Header carrying [`SerializedEvent::event_type`].
pub const EVENT_TYPE_HEADER: &str = "event_type";
/// Header carrying [`SerializedEvent::metadata`] as JSON.
pub const METADATA_HEADER: &str = "metadata";

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka-protocol event bus for Redpanda or Kafka brokers.
///
/// Publishing goes through one shared producer. Every call to
/// [`EventBus::subscribe`] creates its own consumer in the configured group, so
/// instances of the order service split the topic's partitions between them.
///
/// # Example
///
/// ```no_run
/// use ticketflow_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("redpanda-0:9092,redpanda-1:9092")
///     .producer_acks("all")
///     .compression("zstd")
///     .consumer_group("order-booking-group")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Event bus over `brokers` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring an event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    fn group_for(&self, topics: &[String]) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            // Same topics, same group, whatever the order they were given in.
            let mut sorted = topics.to_vec();
            sorted.sort();
            format!("ticketflow-{}", sorted.join("-"))
        })
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// Every service instance subscribing with the same group shares the
    /// topic's partitions. If not set, the group is derived from the topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a new consumer group starts reading: "earliest" or "latest".
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer configuration is invalid.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let timeout = self.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT);
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "latest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            auto_offset_reset = %auto_offset_reset,
            "Event bus ready"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            auto_offset_reset,
        })
    }
}

fn headers_for(event: &SerializedEvent) -> Result<OwnedHeaders, serde_json::Error> {
    let headers = OwnedHeaders::new().insert(Header {
        key: EVENT_TYPE_HEADER,
        value: Some(event.event_type.as_str()),
    });
    match &event.metadata {
        Some(metadata) => {
            let json = serde_json::to_vec(metadata)?;
            Ok(headers.insert(Header {
                key: METADATA_HEADER,
                value: Some(&json),
            }))
        }
        None => Ok(headers),
    }
}

/// Rebuild the event carried by a record.
fn event_from(message: &OwnedMessage) -> Result<SerializedEvent, EventBusError> {
    let payload = message
        .payload()
        .ok_or_else(|| EventBusError::DeserializationFailed("Message has no payload".to_string()))?;

    let mut event_type = String::new();
    let mut metadata = None;
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            match (header.key, header.value) {
                (EVENT_TYPE_HEADER, Some(value)) => {
                    event_type = String::from_utf8_lossy(value).into_owned();
                }
                (METADATA_HEADER, Some(value)) => match serde_json::from_slice(value) {
                    Ok(parsed) => metadata = Some(parsed),
                    Err(e) => tracing::warn!(error = %e, "Ignoring unparseable metadata header"),
                },
                _ => {}
            }
        }
    }

    Ok(SerializedEvent::new(event_type, payload.to_vec(), metadata))
}

enum Settlement {
    Ack,
    Nack,
}

/// Hands the settlement back to the task that owns the consumer.
struct KafkaAcknowledger {
    settle: oneshot::Sender<Settlement>,
}

impl Acknowledger for KafkaAcknowledger {
    fn ack(self: Box<Self>) -> Result<(), EventBusError> {
        self.settle
            .send(Settlement::Ack)
            .map_err(|_| EventBusError::AckFailed("Consumer task has stopped".to_string()))
    }

    fn nack(self: Box<Self>) {
        let _ = self.settle.send(Settlement::Nack);
    }
}

fn commit(consumer: &StreamConsumer, message: &OwnedMessage) {
    let mut offsets = TopicPartitionList::new();
    let result = offsets
        .add_partition_offset(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset() + 1),
        )
        .and_then(|()| consumer.commit(&offsets, CommitMode::Async));

    if let Err(e) = result {
        tracing::warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

fn rewind(consumer: &StreamConsumer, message: &OwnedMessage) {
    tracing::debug!(
        topic = message.topic(),
        partition = message.partition(),
        offset = message.offset(),
        "Delivery not acknowledged, rewinding"
    );
    if let Err(e) = consumer.seek(
        message.topic(),
        message.partition(),
        Offset::Offset(message.offset()),
        Timeout::After(SEEK_TIMEOUT),
    ) {
        tracing::error!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            error = %e,
            "Failed to seek back; the record will be redelivered after a restart"
        );
    }
}

/// Owns the consumer: reads one record, waits for its settlement, then
/// commits or rewinds before reading the next.
async fn forward(consumer: StreamConsumer, tx: mpsc::Sender<Result<Delivery, EventBusError>>) {
    use futures::StreamExt;

    let mut stream = consumer.stream();

    while let Some(msg_result) = stream.next().await {
        let message = match msg_result {
            Ok(message) => message.detach(),
            Err(e) => {
                let err = EventBusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break; // Receiver dropped
                }
                continue;
            }
        };

        let event = match event_from(&message) {
            Ok(event) => event,
            Err(err) => {
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                // Unreadable records are skipped, never retried
                commit(&consumer, &message);
                continue;
            }
        };

        tracing::trace!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            event_type = %event.event_type,
            "Received event"
        );

        let (settle_tx, settle_rx) = oneshot::channel();
        let key = message.key().map(|k| String::from_utf8_lossy(k).into_owned());
        let delivery = Delivery::new(
            message.topic(),
            key,
            event,
            Box::new(KafkaAcknowledger { settle: settle_tx }),
        );

        if tx.send(Ok(delivery)).await.is_err() {
            tracing::debug!("Channel receiver dropped, exiting consumer task");
            break; // Exit WITHOUT committing
        }

        match settle_rx.await {
            Ok(Settlement::Ack) => commit(&consumer, &message),
            Ok(Settlement::Nack) | Err(_) => rewind(&consumer, &message),
        }
    }

    tracing::debug!("Consumer task exiting");
}

impl EventBus for RedpandaEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: Option<&'a str>,
        event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let headers = headers_for(event).map_err(|e| EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: format!("Failed to serialize metadata: {e}"),
            })?;

            let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic)
                .payload(event.data.as_slice())
                .headers(headers);
            if let Some(key) = key {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = ?key,
                        partition,
                        offset,
                        event_type = %event.event_type,
                        "Event published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let consumer_group_id = self.group_for(&topics);

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %self.auto_offset_reset,
                "Subscribed to topics"
            );

            // One record is in flight at a time, so a single slot suffices.
            let (tx, mut rx) = mpsc::channel(1);
            tokio::spawn(forward(consumer, tx));

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use rdkafka::Timestamp;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn build_requires_brokers() {
        assert!(matches!(
            RedpandaEventBus::builder().build(),
            Err(EventBusError::ConnectionFailed(_))
        ));
    }

    fn record(payload: Option<Vec<u8>>, headers: Option<OwnedHeaders>) -> OwnedMessage {
        OwnedMessage::new(
            payload,
            Some(b"5".to_vec()),
            "booking".to_string(),
            Timestamp::NotAvailable,
            0,
            42,
            headers,
        )
    }

    #[test]
    fn headers_carry_type_and_metadata() {
        let event = SerializedEvent::new(
            "BookingPlaced.v1".to_string(),
            b"{}".to_vec(),
            Some(serde_json::json!({"producer": "booking"})),
        );
        let headers = headers_for(&event).expect("headers");

        let decoded = event_from(&record(Some(event.data.clone()), Some(headers))).expect("event");
        assert_eq!(decoded, event);
    }

    #[test]
    fn records_without_headers_have_an_empty_type() {
        let decoded = event_from(&record(Some(b"{}".to_vec()), None)).expect("event");
        assert_eq!(decoded.event_type, "");
        assert_eq!(decoded.metadata, None);
    }

    #[test]
    fn records_without_payload_are_rejected() {
        assert!(matches!(
            event_from(&record(None, None)),
            Err(EventBusError::DeserializationFailed(_))
        ));
    }
}
