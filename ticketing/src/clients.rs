//! HTTP client for the inventory service.
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | snapshot  | `GET {base}/event/{id}` | `{eventId, event, capacity, ticketPrice}` |
//! | decrement | `PUT {base}/event/{id}/capacity/{n}` + `Idempotency-Key` | `{remaining?, alreadyApplied?}` or empty |
//!
//! The service also returns a `venue` object with each event; it is not read.
//!
//! Status mapping: 404 is [`InventoryError::EventNotFound`], 409 is
//! [`InventoryError::InsufficientCapacity`], everything else that is not a
//! success is [`InventoryError::Unavailable`].

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use ticketflow_core::inventory::{
    DecrementOutcome, InventoryError, InventoryQuery, InventorySnapshot, InventoryUpdate,
};
use ticketflow_core::types::{BookingId, EventId};

/// Header carrying the decrement's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecrementBody {
    remaining: Option<u64>,
    #[serde(default)]
    already_applied: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ConflictBody {
    #[serde(default)]
    available: u64,
}

/// Inventory service client.
#[derive(Clone)]
pub struct HttpInventoryClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpInventoryClient {
    /// Create a client for the service at `base_url`, with `timeout` per request.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InventoryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InventoryError::Unavailable(format!("Failed to build client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transport_error(&self, err: &reqwest::Error) -> InventoryError {
        if err.is_timeout() {
            InventoryError::Timeout(self.timeout)
        } else {
            InventoryError::Unavailable(format!("Request failed: {err}"))
        }
    }

    async fn unexpected(response: Response) -> InventoryError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        InventoryError::Unavailable(format!("Inventory service returned {status}: {body}"))
    }

    async fn fetch(&self, event_id: EventId) -> Result<InventorySnapshot, InventoryError> {
        let response = self
            .client
            .get(format!("{}/event/{event_id}", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        match response.status() {
            StatusCode::OK => response
                .json::<InventorySnapshot>()
                .await
                .map_err(|e| {
                    InventoryError::Unavailable(format!("Invalid inventory response: {e}"))
                }),
            StatusCode::NOT_FOUND => Err(InventoryError::EventNotFound(event_id)),
            _ => Err(Self::unexpected(response).await),
        }
    }

    async fn decrement(
        &self,
        event_id: EventId,
        ticket_count: u32,
        key: BookingId,
    ) -> Result<DecrementOutcome, InventoryError> {
        let response = self
            .client
            .put(format!(
                "{}/event/{event_id}/capacity/{ticket_count}",
                self.base_url
            ))
            .header(IDEMPOTENCY_KEY_HEADER, key.to_string())
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        match response.status() {
            StatusCode::ALREADY_REPORTED => Ok(DecrementOutcome::AlreadyApplied),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| self.transport_error(&e))?;
                let body: DecrementBody = if bytes.is_empty() {
                    DecrementBody::default()
                } else {
                    serde_json::from_slice(&bytes).map_err(|e| {
                        InventoryError::Unavailable(format!("Invalid decrement response: {e}"))
                    })?
                };

                if body.already_applied {
                    return Ok(DecrementOutcome::AlreadyApplied);
                }
                let remaining = match body.remaining {
                    Some(remaining) => remaining,
                    // Services that answer with an empty body: read it back.
                    None => self.fetch(event_id).await?.capacity,
                };
                Ok(DecrementOutcome::Applied { remaining })
            }
            StatusCode::NOT_FOUND => Err(InventoryError::EventNotFound(event_id)),
            StatusCode::CONFLICT => {
                let body: ConflictBody = response.json().await.unwrap_or_default();
                Err(InventoryError::InsufficientCapacity {
                    event_id,
                    requested: ticket_count,
                    available: body.available,
                })
            }
            _ => Err(Self::unexpected(response).await),
        }
    }
}

impl InventoryQuery for HttpInventoryClient {
    fn get_inventory(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<InventorySnapshot, InventoryError>> + Send + '_>> {
        Box::pin(self.fetch(event_id))
    }
}

impl InventoryUpdate for HttpInventoryClient {
    fn decrement_capacity(
        &self,
        event_id: EventId,
        ticket_count: u32,
        key: BookingId,
    ) -> Pin<Box<dyn Future<Output = Result<DecrementOutcome, InventoryError>> + Send + '_>> {
        Box::pin(self.decrement(event_id, ticket_count, key))
    }
}
