use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use std::time::Duration;
use std::{fmt, future::Future};
use tokio::time::sleep;
use tracing::warn;

use super::retry_policy::ExponentialBackoff;
use crate::errors::{BridgeError, Result};

/// Creates a JSON-RPC HTTP client with connection pooling and timeout configuration
///
/// The client is reused for every call against one chain. It is configured with:
///
/// - 30-second request timeout to prevent hanging requests
/// - 10MB max request size limit
/// - Internal connection pooling (managed by hyper)
///
/// # Errors
///
/// Returns [`BridgeError::Config`] if the URL cannot be used to build a client.
pub(crate) fn create_rpc_client(rpc_url: &str) -> Result<HttpClient> {
    HttpClientBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .max_request_size(10 * 1024 * 1024) // 10MB
        .build(rpc_url)
        .map_err(|e| BridgeError::Config(format!("invalid RPC url {rpc_url}: {e}")))
}

/// Execute an async operation with exponential backoff retry logic
pub(crate) async fn execute_with_retries<F, Fut, T, E>(
    operation: F,
    operation_name: &str,
    retry_policy: ExponentialBackoff,
) -> std::result::Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < retry_policy.max_retries() => {
                attempt += 1;
                let delay = retry_policy.get_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_retries = retry_policy.max_retries(),
                    delay_secs = delay,
                    error = %e,
                    "Operation failed, retrying..."
                );
                sleep(Duration::from_secs(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Race a request against a timer
///
/// The underlying future is dropped on timeout; an in-flight HTTP request may still
/// complete on the server side and its response is discarded.
pub(crate) async fn with_timeout<T, Fut>(timeout: Option<Duration>, request: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_| BridgeError::Timeout(limit))?,
        None => request.await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = ExponentialBackoff::new(3, 10, 1.5);

        let result: std::result::Result<u32, String> = execute_with_retries(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            },
            "flaky",
            policy,
        )
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let policy = ExponentialBackoff::new(2, 3, 1.5);

        let result: std::result::Result<(), String> = execute_with_retries(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            },
            "always failing",
            policy,
        )
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_elapsed_to_timeout_error() {
        let limit = Duration::from_millis(50);
        let result: Result<()> = with_timeout(Some(limit), async {
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(BridgeError::Timeout(d)) if d == limit));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through_without_limit() {
        let result = with_timeout(None, async { Ok(7u8) }).await;
        assert_eq!(result.ok(), Some(7));
    }
}
