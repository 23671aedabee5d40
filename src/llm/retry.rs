//! Exponential-backoff retry around a single chat call

use std::time::Duration;

use tracing::warn;

use super::client::{LlmClient, LlmError};
use super::types::{ChatRequest, ChatResponse};

/// Retry budget for model calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Call `client.chat`, retrying retryable failures with exponential backoff.
///
/// Non-retryable errors return immediately. After `max_retries` retries the
/// last error is returned.
pub async fn chat_with_retry(
    client: &dyn LlmClient,
    request: &ChatRequest,
    policy: &RetryPolicy,
) -> Result<ChatResponse, LlmError> {
    let mut attempt = 0;
    loop {
        match client.chat(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = match &e {
                    LlmError::RateLimited { retry_after } => (*retry_after).max(policy.delay_for(attempt)),
                    _ => policy.delay_for(attempt),
                };
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "model call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::MockLlmClient;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let mock = MockLlmClient::new();
        mock.push_error(LlmError::Unreachable("refused".to_string()));
        mock.push_error(LlmError::from_status(503, "busy"));
        mock.push(ChatResponse::text("ok"));

        let response = chat_with_retry(&mock, &ChatRequest::default(), &fast()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let mock = MockLlmClient::new();
        for _ in 0..3 {
            mock.push_error(LlmError::Unreachable("refused".to_string()));
        }
        mock.push(ChatResponse::text("never reached"));

        let err = chat_with_retry(&mock, &ChatRequest::default(), &fast()).await.unwrap_err();
        assert!(matches!(err, LlmError::Unreachable(_)));
        assert_eq!(mock.remaining(), 1);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mock = MockLlmClient::new();
        mock.push_error(LlmError::from_status(400, "bad"));
        mock.push(ChatResponse::text("unused"));

        let err = chat_with_retry(&mock, &ChatRequest::default(), &fast()).await.unwrap_err();
        assert!(matches!(err, LlmError::Client { status: 400, .. }));
        assert_eq!(mock.requests().len(), 1);
    }
}
