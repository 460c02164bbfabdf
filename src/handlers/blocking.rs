use crate::error::{AppError, Result};

/// Runs blocking store or hashing work off the async executor.
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?
}
