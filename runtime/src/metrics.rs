//! Prometheus metrics for the booking pipeline.
//!
//! Workflows record through the `metrics` facade; nothing is exported until a
//! binary starts a [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use ticketflow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, histogram};

/// Bookings accepted and published.
pub const BOOKINGS_CREATED: &str = "bookings_created_total";
/// Bookings refused, labelled by `reason`.
pub const BOOKINGS_REJECTED: &str = "bookings_rejected_total";
/// Orders written for the first time.
pub const ORDERS_CREATED: &str = "orders_created_total";
/// Redelivered booking events that found their order already settled.
pub const ORDERS_DUPLICATE: &str = "orders_duplicate_total";
/// Inventory decrement calls, labelled by `outcome`.
pub const INVENTORY_DECREMENTS: &str = "inventory_decrements_total";
/// Deliveries handled by a consumer, labelled by `consumer` and `result`.
pub const CONSUMER_DELIVERIES: &str = "consumer_deliveries_total";
/// Time spent in one workflow run, labelled by `workflow`.
pub const WORKFLOW_DURATION: &str = "workflow_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and start serving `/metrics`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
    /// already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder)
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        self.handle = Some(handle);
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(BOOKINGS_CREATED, "Bookings accepted and published");
    describe_counter!(BOOKINGS_REJECTED, "Bookings refused, by reason");
    describe_counter!(ORDERS_CREATED, "Orders written for the first time");
    describe_counter!(
        ORDERS_DUPLICATE,
        "Redelivered booking events whose order was already settled"
    );
    describe_counter!(INVENTORY_DECREMENTS, "Inventory decrement calls, by outcome");
    describe_counter!(CONSUMER_DELIVERIES, "Deliveries handled, by consumer and result");
    describe_histogram!(WORKFLOW_DURATION, "Time spent in one workflow run");
}

/// Record how long a workflow run took.
pub fn record_workflow(workflow: &'static str, elapsed: Duration) {
    histogram!(WORKFLOW_DURATION, "workflow" => workflow).record(elapsed.as_secs_f64());
}
