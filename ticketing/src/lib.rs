//! Booking and order workflows of the ticketing pipeline.
//!
//! A booking is validated against the customer directory and an inventory
//! snapshot, then published as a [`BookingEvent`](ticketflow_core::booking::BookingEvent).
//! The order service consumes those events, writes one order per booking and
//! decrements inventory exactly once per booking.
//!
//! # Architecture
//!
//! ```text
//!  book CLI                                   order-service
//! ┌────────────────┐   topic "booking"   ┌──────────────────────────────┐
//! │ BookingWorkflow│────────────────────▶│ EventConsumer                │
//! └───────┬────────┘                     │   └─ OrderEventHandler       │
//!         │ customer lookup              │        └─ OrderWorkflow      │
//!         │ inventory snapshot           │ InventoryReconciler (Pending)│
//!         ▼                              └──────────────┬───────────────┘
//!  customers / inventory                    orders / inventory decrement
//! ```
//!
//! # Modules
//!
//! - [`booking`]: request validation, pricing and publish
//! - [`orders`]: order creation, keyed inventory decrement, consumer handler
//! - [`reconciler`]: retries decrements left `Pending`
//! - [`clients`]: HTTP inventory service client
//! - [`config`], [`telemetry`], [`app`]: environment, logging and wiring

#![forbid(unsafe_code)]

pub mod app;
pub mod booking;
pub mod clients;
pub mod config;
pub mod orders;
pub mod reconciler;
pub mod telemetry;

pub use booking::BookingWorkflow;
pub use clients::HttpInventoryClient;
pub use config::Config;
pub use orders::{OrderEventHandler, OrderWorkflow};
pub use reconciler::{InventoryReconciler, ReconcileReport};
