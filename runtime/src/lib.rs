//! # Ticketflow Runtime
//!
//! Execution machinery shared by the ticketing services:
//!
//! - [`consumer`]: subscribe to a topic and drive an [`consumer::EventHandler`]
//!   with ack-after-processing semantics
//! - [`retry`]: exponential backoff for transient failures
//! - [`timeout`]: bounded collaborator calls
//! - [`metrics`]: Prometheus exporter and the pipeline's metric names

pub mod consumer;
pub mod metrics;
pub mod retry;
pub mod timeout;

pub use consumer::{EventConsumer, EventHandler, HandlerError};
pub use retry::{RetryPolicy, retry_with_predicate};
pub use timeout::bounded;
