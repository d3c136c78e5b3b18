//! Order service.
//!
//! This binary:
//! - Connects to `PostgreSQL` (running migrations) and `Redpanda`
//! - Consumes booking events as the `order-booking-group` consumer group
//! - Reconciles orders whose inventory decrement is still pending
//! - Serves Prometheus metrics
//!
//! # Usage
//!
//! ```bash
//! # PostgreSQL and Redpanda must be reachable (see `Config`)
//! cargo run --bin order-service
//! ```

use std::sync::Arc;
use ticketing::app::Infrastructure;
use ticketing::telemetry::init_tracing;
use ticketing::{Config, InventoryReconciler, OrderEventHandler};
use ticketflow_runtime::EventConsumer;
use ticketflow_runtime::metrics::MetricsServer;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    init_tracing(config.server.log_format);

    tracing::info!("Starting order service...");
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        topic = %config.redpanda.booking_topic,
        group = %config.redpanda.consumer_group,
        inventory = ?config.inventory.backend,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.server.metrics_addr);
    metrics.start()?;

    let infra = Infrastructure::connect(config).await?;
    let config = infra.config().clone();
    let workflow = Arc::new(infra.order_workflow());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = EventConsumer::new(
        "order-service",
        &[config.redpanda.booking_topic.as_str()],
        Arc::clone(&infra.event_bus),
        Arc::new(OrderEventHandler::new(Arc::clone(&workflow))),
        shutdown_rx.clone(),
    )
    .spawn();

    let reconciler = InventoryReconciler::new(infra.order_store(), workflow, shutdown_rx)
        .with_interval(config.reconcile_interval())
        .with_batch_size(config.workflow.reconcile_batch_size)
        .spawn();

    tracing::info!("Order service is running, press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(true);
    let (consumer, reconciler) = tokio::join!(consumer, reconciler);
    consumer?;
    reconciler?;

    infra.pool.close().await;
    tracing::info!("Order service stopped");
    Ok(())
}
