//! Per-operation time bounds.

use std::future::Future;
use std::time::Duration;

/// Await `fut` for at most `limit`, mapping expiry through `elapsed`.
pub(crate) async fn within<T, E, F>(
    limit: Duration,
    fut: F,
    elapsed: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(elapsed()),
    }
}
