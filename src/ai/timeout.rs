//! Timeout Helpers
//!
//! Wraps async operations with a deadline and maps expiry onto the crate's
//! error types:
//! - [`with_timeout`] for application operations (`ReportError::Timeout`)
//! - [`with_llm_timeout`] for backend calls (`LlmError` in the `Network`
//!   category, so the workflow treats it as transient)
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::with_timeout;
//!
//! let result = with_timeout(
//!     Duration::from_secs(30),
//!     async { /* operation */ },
//!     "operation"
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::types::{ErrorCategory, LlmError, ReportError, Result};

/// Execute an async operation with a timeout
///
/// Returns `ReportError::Timeout` if the operation doesn't complete within
/// the specified duration.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ReportError::timeout(operation_name, timeout)),
    }
}

/// Execute a backend call with a timeout
pub async fn with_llm_timeout<T, F>(
    timeout: Duration,
    future: F,
    provider: &str,
) -> std::result::Result<T, LlmError>
where
    F: Future<Output = std::result::Result<T, LlmError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::with_provider(
            ErrorCategory::Network,
            format!("request timed out after {:?}", timeout),
            provider,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, ReportError>(42) },
            "test operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, ReportError>(42)
            },
            "slow operation",
        )
        .await;
        assert!(matches!(result.unwrap_err(), ReportError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_timeout_is_retryable() {
        let err = with_llm_timeout(
            Duration::from_millis(10),
            std::future::pending::<std::result::Result<(), LlmError>>(),
            "openai",
        )
        .await
        .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Network);
        assert!(err.is_retryable());
    }
}
