//! Core LLM client trait, error type, and a scripted mock

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse};

/// Stateless chat client - each call carries the full conversation
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single chat completion, blocking until the model answers
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Cheap reachability check used by preflight
    async fn ping(&self) -> Result<(), LlmError> {
        Ok(())
    }

    /// Model identifier for logs and journals
    fn model(&self) -> &str {
        "unknown"
    }
}

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Request rejected {status}: {message}")]
    Client { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Map an HTTP status and body to the matching variant
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => LlmError::RateLimited {
                retry_after: Duration::from_secs(1),
            },
            500.. => LlmError::Server { status, message },
            _ => LlmError::Client { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Unreachable(_) => true,
            LlmError::RateLimited { .. } => true,
            LlmError::Server { .. } => true,
            LlmError::Client { .. } => false,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
        }
    }
}

/// Scripted client for tests: replays queued results in order and records
/// every request it receives.
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    ping_error: Mutex<Option<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mock that answers with `responses` in order
    pub fn with_responses(responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        let mock = Self::new();
        for response in responses {
            mock.push(response);
        }
        mock
    }

    /// Queue a successful response
    pub fn push(&self, response: ChatResponse) {
        self.lock_script().push_back(Ok(response));
    }

    /// Queue an error
    pub fn push_error(&self, error: LlmError) {
        self.lock_script().push_back(Err(error));
    }

    /// Make `ping` fail with the given message
    pub fn fail_ping(&self, message: impl Into<String>) {
        *self.ping_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    /// Snapshot of every request received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_script().len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ChatResponse, LlmError>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request);
        self.lock_script()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("mock script exhausted".to_string())))
    }

    async fn ping(&self) -> Result<(), LlmError> {
        match self.ping_error.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            Some(message) => Err(LlmError::Unreachable(message)),
            None => Ok(()),
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}
