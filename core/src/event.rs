//! Event trait and the channel envelope.
//!
//! Events represent facts that have already happened and are immutable once
//! published. On the wire they are JSON documents: the booking event must stay
//! readable by producers and consumers that are not written in Rust, and the
//! decimal price travels as a string so no precision is lost.
//!
//! # Example
//!
//! ```
//! use ticketflow_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct CapacityReleased { event_id: i64, tickets: u32 }
//!
//! impl Event for CapacityReleased {
//!     fn event_type(&self) -> &'static str {
//!         "CapacityReleased.v1"
//!     }
//! }
//! ```

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Encoding and decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Event could not be encoded.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Payload is not valid JSON for the event.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Payload decoded but breaks an invariant of the event.
    #[error("Invalid event: {0}")]
    Invalid(String),

    /// The envelope carries a different event type than expected.
    #[error("Unexpected event type: expected {expected}, got {actual}")]
    UnexpectedEventType {
        /// Type the caller wanted to decode
        expected: &'static str,
        /// Type found in the envelope
        actual: String,
    },
}

/// An event that can be published on the channel.
///
/// The `event_type()` method returns a stable identifier with a version
/// suffix (`"BookingPlaced.v1"`) so schemas can evolve.
pub trait Event: Send + Sync + 'static {
    /// Versioned type name stored in the envelope.
    fn event_type(&self) -> &'static str;

    /// Encode as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode from JSON.
    ///
    /// Unknown fields are ignored, so newer producers can add fields.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] for malformed payloads.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Envelope handed to the event bus: type name, JSON payload, metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedEvent {
    /// Versioned type name. Empty when the transport did not carry a type, which happens for
    /// records written by foreign producers.
    pub event_type: String,

    /// JSON payload.
    pub data: Vec<u8>,

    /// Free-form metadata, usually `{"correlation_id": ...}`.
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Envelope around an already encoded payload.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Wrap `event` with its type name.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }

    /// Decode the payload as `E`.
    ///
    /// An envelope without a type is decoded optimistically; an envelope with
    /// a different type is refused.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnexpectedEventType`] or
    /// [`EventError::DeserializationError`].
    pub fn decode<E>(&self, expected: &'static str) -> Result<E, EventError>
    where
        E: Event + DeserializeOwned,
    {
        if !self.event_type.is_empty() && self.event_type != expected {
            return Err(EventError::UnexpectedEventType {
                expected,
                actual: self.event_type.clone(),
            });
        }
        E::from_bytes(&self.data)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes)",
            self.event_type,
            self.data.len()
        )
    }
}
