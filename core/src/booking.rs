//! Booking request, booking event and confirmation.

use crate::event::{Event, EventError};
use crate::types::{BookingId, CustomerId, EventId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// A client's request to book tickets for an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    /// Customer placing the booking
    pub user_id: CustomerId,
    /// Event to book
    pub event_id: EventId,
    /// Number of tickets, must be at least one
    pub ticket_count: u32,
}

impl BookingRequest {
    /// Create a new request.
    #[must_use]
    pub const fn new(user_id: CustomerId, event_id: EventId, ticket_count: u32) -> Self {
        Self {
            user_id,
            event_id,
            ticket_count,
        }
    }
}

/// Price of `ticket_count` tickets at `ticket_price` each.
#[must_use]
pub fn total_price(ticket_price: Decimal, ticket_count: u32) -> Decimal {
    ticket_price * Decimal::from(ticket_count)
}

/// An accepted booking, published once on the `booking` topic.
///
/// `total_price` is computed at publish time and never recomputed downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEvent {
    /// Deduplication key assigned at publish time
    pub booking_id: BookingId,
    /// Customer who booked
    pub user_id: CustomerId,
    /// Event booked
    pub event_id: EventId,
    /// Number of tickets booked
    pub ticket_count: u32,
    /// `ticket_price × ticket_count` at booking time
    pub total_price: Decimal,
    /// When the booking was accepted
    pub placed_at: Option<DateTime<Utc>>,
}

impl BookingEvent {
    /// Event type identifier on the wire.
    pub const EVENT_TYPE: &'static str = "BookingPlaced.v1";

    /// The natural key used when a producer did not assign a booking id.
    #[must_use]
    pub fn natural_key(
        user_id: CustomerId,
        event_id: EventId,
        ticket_count: u32,
        total_price: Decimal,
    ) -> String {
        format!("{user_id}:{event_id}:{ticket_count}:{}", total_price.normalize())
    }

    /// Check the invariants every consumer relies on: at least one ticket and
    /// a non-negative total.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Invalid`] naming the broken invariant.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.ticket_count == 0 {
            return Err(EventError::Invalid(format!(
                "booking {} has no tickets",
                self.booking_id
            )));
        }
        if self.total_price < Decimal::ZERO {
            return Err(EventError::Invalid(format!(
                "booking {} has negative total {}",
                self.booking_id, self.total_price
            )));
        }
        Ok(())
    }
}

impl Event for BookingEvent {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }
}

/// Wire shape accepted on decode: `bookingId` and `placedAt` are optional so
/// payloads from producers that never set them are still accepted.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingEventWire {
    booking_id: Option<BookingId>,
    user_id: CustomerId,
    event_id: EventId,
    ticket_count: u32,
    total_price: Decimal,
    #[serde(default)]
    placed_at: Option<DateTime<Utc>>,
}

impl<'de> Deserialize<'de> for BookingEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = BookingEventWire::deserialize(deserializer)?;
        let booking_id = wire.booking_id.unwrap_or_else(|| {
            BookingId::from_natural_key(&Self::natural_key(
                wire.user_id,
                wire.event_id,
                wire.ticket_count,
                wire.total_price,
            ))
        });
        let event = Self {
            booking_id,
            user_id: wire.user_id,
            event_id: wire.event_id,
            ticket_count: wire.ticket_count,
            total_price: wire.total_price,
            placed_at: wire.placed_at,
        };
        event.validate().map_err(serde::de::Error::custom)?;
        Ok(event)
    }
}

/// What the booking caller gets back; mirrors the published event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmation {
    /// Identifier of the published booking
    pub booking_id: BookingId,
    /// Customer who booked
    pub user_id: CustomerId,
    /// Event booked
    pub event_id: EventId,
    /// Number of tickets booked
    pub ticket_count: u32,
    /// Total price charged
    pub total_price: Decimal,
}

impl From<&BookingEvent> for BookingConfirmation {
    fn from(event: &BookingEvent) -> Self {
        Self {
            booking_id: event.booking_id,
            user_id: event.user_id,
            event_id: event.event_id,
            ticket_count: event.ticket_count,
            total_price: event.total_price,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_price_is_exact() {
        assert_eq!(total_price(dec!(10.00), 3), dec!(30.00));
        assert_eq!(total_price(dec!(0.10), 3), dec!(0.30));
    }

    #[test]
    fn event_uses_camel_case_fields() {
        let event = BookingEvent {
            booking_id: BookingId::new(),
            user_id: CustomerId::new(1),
            event_id: EventId::new(5),
            ticket_count: 2,
            total_price: dec!(40.00),
            placed_at: None,
        };

        let json: serde_json::Value =
            serde_json::from_slice(&event.to_bytes().expect("serialize")).expect("json");

        assert_eq!(json["userId"], 1);
        assert_eq!(json["eventId"], 5);
        assert_eq!(json["ticketCount"], 2);
        assert_eq!(json["totalPrice"], "40.00");
    }

    #[test]
    fn payload_without_booking_id_gets_stable_id() {
        let payload = br#"{"userId":1,"eventId":5,"ticketCount":2,"totalPrice":40.00}"#;

        let first = BookingEvent::from_bytes(payload).expect("decode");
        let second = BookingEvent::from_bytes(payload).expect("decode");

        assert_eq!(first.booking_id, second.booking_id);
        assert_eq!(first.total_price, dec!(40.00));
        assert_eq!(first.placed_at, None);
    }

    #[test]
    fn zero_tickets_or_negative_total_do_not_decode() {
        let zero = br#"{"userId":1,"eventId":5,"ticketCount":0,"totalPrice":"0"}"#;
        let negative = br#"{"userId":1,"eventId":5,"ticketCount":2,"totalPrice":"-40.00"}"#;

        assert!(matches!(
            BookingEvent::from_bytes(zero),
            Err(EventError::DeserializationError(msg)) if msg.contains("no tickets")
        ));
        assert!(matches!(
            BookingEvent::from_bytes(negative),
            Err(EventError::DeserializationError(msg)) if msg.contains("negative total")
        ));
    }

    #[test]
    fn free_bookings_are_valid() {
        let payload = br#"{"userId":1,"eventId":5,"ticketCount":2,"totalPrice":"0.00"}"#;

        let event = BookingEvent::from_bytes(payload).expect("decode");

        assert_eq!(event.validate(), Ok(()));
    }

    #[test]
    fn natural_key_ignores_trailing_zeros() {
        let a = BookingEvent::natural_key(CustomerId::new(1), EventId::new(5), 2, dec!(40.00));
        let b = BookingEvent::natural_key(CustomerId::new(1), EventId::new(5), 2, dec!(40));
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn total_price_matches_repeated_addition(cents in 0i64..1_000_000, count in 1u32..50) {
            let price = Decimal::new(cents, 2);
            let mut expected = Decimal::ZERO;
            for _ in 0..count {
                expected += price;
            }
            prop_assert_eq!(total_price(price, count), expected);
        }
    }
}
