use std::time::Duration;

use super::error::Error;

/// Bounded attempt count for optimistic-concurrency retries.
const RETRY_STEPS: u32 = 5;

/// Pause between conflicting attempts.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Re-runs a read-modify-write operation while it fails with a version
/// conflict, up to [`RETRY_STEPS`] attempts.
///
/// The operation must re-fetch the resource on every invocation so each
/// attempt works from the latest version token. Any non-conflict error
/// aborts immediately; list/get/create/delete failures are never retried.
pub async fn on_conflict<F, Fut>(mut op: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let mut attempts = 0;
    loop {
        match op().await {
            Err(err) if err.is_conflict() => {
                attempts += 1;
                if attempts >= RETRY_STEPS {
                    return Err(err);
                }
                tokio::time::sleep(RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}
