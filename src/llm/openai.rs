//! OpenAI-compatible chat-completions client
//!
//! Talks to any server exposing `/chat/completions` and `/models` in the
//! OpenAI wire format (vLLM, llama.cpp server, Ollama's compatibility layer).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::config::LlmConfig;
use crate::llm::client::{LlmClient, LlmError};
use crate::llm::tool_parser::{parse_arguments, parse_inline_tool_calls};
use crate::llm::types::{ChatRequest, ChatResponse, Message, Role, ToolInvocation, Usage};

/// Bearer token sent when no API key is configured
const PLACEHOLDER_API_KEY: &str = "not-needed";

/// OpenAI-compatible API client
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    usage: Arc<Mutex<Usage>>,
}

impl OpenAiClient {
    /// Create a client from the `llm` config section
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| PLACEHOLDER_API_KEY.to_string()),
            usage: Arc::new(Mutex::new(Usage::default())),
        })
    }

    /// Cumulative usage across every call made by this client
    pub fn total_usage(&self) -> Usage {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Build the request body in OpenAI function-calling format
    fn build_body(&self, request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_wire).collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request.tools.iter().map(|t| t.to_openai_schema()).collect();
            body["tools"] = json!(tools);
        }

        body
    }

    /// Parse the API response into a ChatResponse
    fn parse_response(&self, body: Value) -> Result<ChatResponse, LlmError> {
        let response = parse_chat_response(&body)?;
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add(&response.usage);
        Ok(response)
    }

    fn map_transport_error(e: reqwest::Error) -> LlmError {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            LlmError::Unreachable(e.to_string())
        } else if let Some(status) = e.status() {
            LlmError::from_status(status.as_u16(), e.to_string())
        } else {
            LlmError::Unreachable(e.to_string())
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = self.build_body(&request);
        log::debug!(
            "POST {}/chat/completions ({} messages, {} tools)",
            self.base_url,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let body: Value = response.json().await.map_err(Self::map_transport_error)?;
        self.parse_response(body)
    }

    async fn ping(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(LlmError::from_status(status.as_u16(), "model listing failed"))
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut wire = json!({ "role": role, "content": message.content });

    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments.to_string() }
                })
            })
            .collect();
        wire["tool_calls"] = json!(calls);
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }
    wire
}

/// Parse an OpenAI chat-completions body.
///
/// Structured `tool_calls` win; otherwise inline calls are scraped from the
/// message text.
pub fn parse_chat_response(body: &Value) -> Result<ChatResponse, LlmError> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::InvalidResponse("response has no choices[0].message".to_string()))?;

    let content = message.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string();

    let mut tool_calls: Vec<ToolInvocation> = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, call)| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?;
                    let id = call
                        .get("id")
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .unwrap_or_else(|| format!("call-{}", i));
                    let arguments = function.get("arguments").map(parse_arguments).unwrap_or_default();
                    Some(ToolInvocation::new(id, name, arguments))
                })
                .collect()
        })
        .unwrap_or_default();

    if tool_calls.is_empty() {
        tool_calls = parse_inline_tool_calls(&content);
    }

    let usage = body
        .get("usage")
        .map(|u| {
            Usage::new(
                u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            )
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
    })
}
