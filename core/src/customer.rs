//! Customer lookup.

use crate::order::StoreError;
use crate::types::CustomerId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// A customer known to the booking service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer key
    pub id: CustomerId,
    /// Display name
    pub name: String,
    /// Contact address
    pub email: String,
}

/// Read access to the customer store.
pub trait CustomerDirectory: Send + Sync {
    /// Find a customer by id; `Ok(None)` when no such customer exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached.
    fn find_by_id(
        &self,
        id: CustomerId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Customer>, StoreError>> + Send + '_>>;
}
