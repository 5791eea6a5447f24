//! Request handlers

pub mod analytics;
pub mod audit;
pub mod bills;
pub mod health;

use std::future::Future;
use std::time::Duration;

use domain_billing::BillingError;

use crate::error::ApiError;

/// Runs a ledger mutation on its own task, bounded by `timeout`
///
/// On timeout the caller gets [`ApiError::Timeout`] while the task, and the
/// transaction it holds, runs to completion in the background.
pub(crate) async fn run_detached<T, F>(timeout: Duration, operation: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, BillingError>> + Send + 'static,
{
    let task = tokio::spawn(operation);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result.map_err(ApiError::from),
        Ok(Err(join_error)) => Err(ApiError::Internal(format!("operation task failed: {}", join_error))),
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Operation outlived the request timeout");
            Err(ApiError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_result_passes_through() {
        let ok = run_detached(Duration::from_secs(1), async { Ok::<_, BillingError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = run_detached(Duration::from_secs(1), async {
            Err::<(), _>(BillingError::validation("nope"))
        })
        .await;
        assert!(matches!(err, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_timeout_leaves_task_running() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let result = run_detached(Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
            Ok::<_, BillingError>(())
        })
        .await;

        assert!(matches!(result, Err(ApiError::Timeout)));
        assert!(rx.await.is_ok(), "task should finish after the timeout");
    }
}
