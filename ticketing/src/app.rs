//! Wiring of the production collaborators from a [`Config`].

use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;
use ticketflow_core::environment::SystemClock;
use ticketflow_core::event_bus::EventBus;
use ticketflow_core::inventory::{InventoryQuery, InventoryUpdate};
use ticketflow_postgres::{
    PostgresCustomerDirectory, PostgresInventory, PostgresOrderStore, connect, migrate,
};
use ticketflow_redpanda::RedpandaEventBus;

use crate::booking::BookingWorkflow;
use crate::clients::HttpInventoryClient;
use crate::config::{Config, InventoryBackend};
use crate::orders::OrderWorkflow;

/// Connected infrastructure shared by the workflows.
pub struct Infrastructure {
    /// Order service database
    pub pool: PgPool,
    /// Booking topic transport
    pub event_bus: Arc<dyn EventBus>,
    /// Inventory reads
    pub inventory_query: Arc<dyn InventoryQuery>,
    /// Inventory decrements
    pub inventory_update: Arc<dyn InventoryUpdate>,
    config: Config,
}

impl Infrastructure {
    /// Connect to `PostgreSQL` (running migrations), the broker and the
    /// configured inventory backend.
    ///
    /// # Errors
    ///
    /// Returns an error if any connection cannot be established.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        tracing::info!("Connecting to PostgreSQL...");
        let pool = connect(
            &config.postgres.url,
            config.postgres.max_connections,
            config.connect_timeout(),
        )
        .await
        .context("connecting to PostgreSQL")?;
        migrate(&pool).await.context("running migrations")?;

        tracing::info!(brokers = %config.redpanda.brokers, "Connecting to Redpanda...");
        let event_bus = RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .producer_acks(&config.redpanda.producer_acks)
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .timeout(config.call_timeout())
            .build()
            .context("creating Redpanda event bus")?;

        let (inventory_query, inventory_update): (
            Arc<dyn InventoryQuery>,
            Arc<dyn InventoryUpdate>,
        ) = match config.inventory.backend {
            InventoryBackend::Http => {
                tracing::info!(
                    url = %config.inventory.service_url,
                    "Using HTTP inventory service"
                );
                let client = Arc::new(
                    HttpInventoryClient::new(
                        config.inventory.service_url.clone(),
                        config.call_timeout(),
                    )
                    .context("creating inventory client")?,
                );
                (
                    Arc::clone(&client) as Arc<dyn InventoryQuery>,
                    client as Arc<dyn InventoryUpdate>,
                )
            }
            InventoryBackend::Postgres => {
                tracing::info!("Using PostgreSQL inventory");
                let inventory = Arc::new(PostgresInventory::new(pool.clone()));
                (
                    Arc::clone(&inventory) as Arc<dyn InventoryQuery>,
                    inventory as Arc<dyn InventoryUpdate>,
                )
            }
        };

        Ok(Self {
            pool,
            event_bus: Arc::new(event_bus),
            inventory_query,
            inventory_update,
            config,
        })
    }

    /// Configuration the infrastructure was built from.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Order store over the service database.
    #[must_use]
    pub fn order_store(&self) -> Arc<PostgresOrderStore> {
        Arc::new(PostgresOrderStore::new(self.pool.clone()))
    }

    /// Booking workflow publishing to the configured topic.
    #[must_use]
    pub fn booking_workflow(&self) -> BookingWorkflow {
        BookingWorkflow::new(
            Arc::new(PostgresCustomerDirectory::new(self.pool.clone())),
            Arc::clone(&self.inventory_query),
            Arc::clone(&self.event_bus),
            Arc::new(SystemClock),
        )
        .with_topic(&self.config.redpanda.booking_topic)
        .with_call_timeout(self.config.call_timeout())
    }

    /// Order workflow with the configured retry policy.
    #[must_use]
    pub fn order_workflow(&self) -> OrderWorkflow {
        OrderWorkflow::new(
            self.order_store(),
            Arc::clone(&self.inventory_update),
            Arc::new(SystemClock),
        )
        .with_retry_policy(self.config.retry_policy())
        .with_call_timeout(self.config.call_timeout())
    }
}
