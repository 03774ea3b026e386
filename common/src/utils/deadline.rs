use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Runs an external call bounded by both a timeout and the request's cancellation token.
///
/// The inner future is dropped as soon as either fires, releasing whatever
/// connection it was holding.
pub async fn with_deadline<F, T>(
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AppError::Cancelled {
            operation: operation.to_owned(),
        }),
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(result) => result,
            Err(_elapsed) => Err(AppError::Timeout {
                operation: operation.to_owned(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_results() {
        let token = CancellationToken::new();
        let value = with_deadline("fast", Duration::from_secs(1), &token, async {
            Ok::<_, AppError>(7)
        })
        .await
        .expect("fast call");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn slow_calls_become_timeouts() {
        let token = CancellationToken::new();
        let result = with_deadline("slow", Duration::from_millis(20), &token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout { operation }) if operation == "slow"));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_call() {
        let token = CancellationToken::new();
        token.cancel();
        let result = with_deadline("cancelled", Duration::from_secs(5), &token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Cancelled { .. })));
    }
}
