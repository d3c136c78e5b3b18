//! Bounded collaborator calls.
//!
//! Every call leaving the process goes through [`bounded`] so a stuck
//! dependency fails the workflow instead of blocking it.

use std::future::Future;
use std::time::Duration;

/// Run `call`, failing with `on_elapsed(limit)` if it does not finish within `limit`.
///
/// # Errors
///
/// Returns the call's own error, or the error built by `on_elapsed`.
pub async fn bounded<F, T, E, O>(limit: Duration, call: F, on_elapsed: O) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    O: FnOnce(Duration) -> E,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed(limit)),
    }
}
