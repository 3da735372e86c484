use flashtix_core::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;

/// Runs one store round-trip, failing with `StoreError::Timeout` once
/// `deadline` elapses.
pub async fn within<T, E, F>(deadline: Duration, op: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(StoreError::backend),
        Err(_) => {
            tracing::warn!("Store call {} timed out after {:?}", op, deadline);
            Err(StoreError::Timeout { op, after: deadline })
        }
    }
}
