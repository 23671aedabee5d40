//! LLM Client Layer - OpenAI-compatible chat completions with tool calling
//!
//! This module provides:
//! - Message and tool-call types for LLM communication
//! - LlmClient trait for API abstraction, plus a scripted mock
//! - OpenAiClient implementation
//! - Retry with exponential backoff
//! - Inline tool-call parsing for models without structured output

pub mod client;
pub mod openai;
pub mod retry;
pub mod tool_parser;
pub mod types;

pub use client::{LlmClient, LlmError, MockLlmClient};
pub use openai::OpenAiClient;
pub use retry::{RetryPolicy, chat_with_retry};
pub use tool_parser::parse_inline_tool_calls;
pub use types::{ChatRequest, ChatResponse, Message, Role, ToolDefinition, ToolInvocation, Usage};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _role = Role::Tool;
        let _policy = RetryPolicy::default();
        let _mock = MockLlmClient::new();
    }
}
