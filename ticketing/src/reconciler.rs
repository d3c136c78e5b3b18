//! Background completion of `Pending` inventory decrements.
//!
//! An order stays `Pending` when its decrement kept failing after the order was
//! written. The reconciler periodically loads the oldest pending orders and runs
//! the decrement again through [`OrderWorkflow::apply_inventory`], so recovery
//! does not depend on the booking event being redelivered.

use std::sync::Arc;
use std::time::Duration;
use ticketflow_core::order::{InventoryStatus, OrderStore, StoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::orders::OrderWorkflow;

/// Counts from one reconciler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pending orders loaded
    pub examined: usize,
    /// Orders now `Applied`
    pub applied: usize,
    /// Orders now `Rejected`
    pub rejected: usize,
    /// Orders still `Pending`
    pub still_pending: usize,
}

/// Periodic task settling pending orders.
pub struct InventoryReconciler {
    orders: Arc<dyn OrderStore>,
    workflow: Arc<OrderWorkflow>,
    shutdown: watch::Receiver<bool>,
    interval: Duration,
    batch_size: usize,
}

impl InventoryReconciler {
    /// Create a reconciler running every 30 seconds over batches of 100 orders.
    #[must_use]
    pub const fn new(
        orders: Arc<dyn OrderStore>,
        workflow: Arc<OrderWorkflow>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orders,
            workflow,
            shutdown,
            interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }

    /// Pause between passes.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Maximum orders per pass.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run the loop on a new task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run passes until shutdown.
    pub async fn run(mut self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Starting inventory reconciler"
        );

        while !self.stopping() {
            match self.run_once().await {
                Ok(report) if report.examined > 0 => {
                    tracing::info!(
                        examined = report.examined,
                        applied = report.applied,
                        rejected = report.rejected,
                        still_pending = report.still_pending,
                        "Reconciler pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to load pending orders"),
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Inventory reconciler stopped");
    }

    /// Run one pass over the oldest pending orders.
    ///
    /// Stops early, between orders, once shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the pending orders cannot be loaded. Failures
    /// on individual orders are logged and counted as still pending.
    pub async fn run_once(&self) -> Result<ReconcileReport, StoreError> {
        let pending = self.orders.pending_inventory(self.batch_size).await?;
        let mut report = ReconcileReport::default();

        for order in pending {
            if self.stopping() {
                break;
            }
            report.examined += 1;
            let order_id = order.id;

            match self.workflow.apply_inventory(order).await {
                Ok(order) => match order.inventory_status {
                    InventoryStatus::Applied => report.applied += 1,
                    InventoryStatus::Rejected => report.rejected += 1,
                    InventoryStatus::Pending => report.still_pending += 1,
                },
                Err(e) => {
                    tracing::warn!(%order_id, error = %e, "Order still pending");
                    report.still_pending += 1;
                }
            }
        }

        Ok(report)
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }
}
