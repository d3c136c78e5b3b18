//! `PostgreSQL`-backed customer directory.

use crate::store_error;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use ticketflow_core::customer::{Customer, CustomerDirectory};
use ticketflow_core::order::StoreError;
use ticketflow_core::types::CustomerId;

/// Customer lookup over the `customers` table.
#[derive(Clone)]
pub struct PostgresCustomerDirectory {
    pool: PgPool,
}

impl PostgresCustomerDirectory {
    /// Create a directory over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a customer and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub async fn register(&self, name: &str, email: &str) -> Result<CustomerId, StoreError> {
        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO customers (name, email) VALUES ($1, $2) RETURNING id")
                .bind(name)
                .bind(email)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| store_error("Failed to insert customer", &e))?;

        Ok(CustomerId::new(id))
    }
}

impl CustomerDirectory for PostgresCustomerDirectory {
    fn find_by_id(
        &self,
        id: CustomerId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Customer>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row: Option<(i64, String, String)> =
                sqlx::query_as("SELECT id, name, email FROM customers WHERE id = $1")
                    .bind(id.get())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| store_error("Failed to load customer", &e))?;

            Ok(row.map(|(id, name, email)| Customer {
                id: CustomerId::new(id),
                name,
                email,
            }))
        })
    }
}
