//! Client for OpenAI-compatible `/chat/completions` endpoints (Ollama, vLLM, OpenAI).
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::retry::{
    is_retryable_http_error, new_request_id, parse_retry_after_ms, retry_delay_ms,
    should_retry_status,
};
use crate::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, LlmError, Message, MessageRole,
    ToolDefinition,
};

pub const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";

#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub api_base: String,
    /// Sent as a bearer token when present. Local Ollama needs none.
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_jitter: bool,
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            request_timeout_ms: 120_000,
            max_retries: 2,
            retry_jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, LlmError> {
        if config.api_base.trim().is_empty() {
            return Err(LlmError::InvalidConfig("api base must not be empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
        {
            let bearer = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|error| {
                LlmError::InvalidConfig(format!("invalid API key header: {error}"))
            })?;
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = build_chat_request_body(&request)?;
        let url = self.chat_completions_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            tracing::debug!(
                model = %request.model,
                messages = request.messages.len(),
                attempt,
                "sending chat completion request"
            );
            let response = self
                .client
                .post(&url)
                .header("x-forkchat-request-id", new_request_id())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let delay_ms =
                            retry_delay_ms(attempt, self.config.retry_jitter, retry_after_ms);
                        tracing::warn!(status = status.as_u16(), delay_ms, "retrying model request");
                        sleep(Duration::from_millis(delay_ms)).await;
                        continue;
                    }
                    return Err(LlmError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let delay_ms = retry_delay_ms(attempt, self.config.retry_jitter, None);
                        tracing::warn!(%error, delay_ms, "retrying model request after transport error");
                        sleep(Duration::from_millis(delay_ms)).await;
                        continue;
                    }
                    return Err(LlmError::Http(error));
                }
            }
        }

        Err(LlmError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Result<Value, LlmError> {
    let messages = request
        .messages
        .iter()
        .map(to_wire_message)
        .collect::<Result<Vec<_>, _>>()?;
    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": false,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(to_wire_tool).collect());
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    Ok(body)
}

fn to_wire_message(message: &Message) -> Result<Value, LlmError> {
    let text = message.text_content();
    let wire = match message.role {
        MessageRole::System | MessageRole::User => json!({
            "role": message.role.as_str(),
            "content": text,
        }),
        MessageRole::Assistant => {
            let tool_calls = message
                .tool_calls()
                .into_iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect::<Vec<_>>();
            if tool_calls.is_empty() {
                json!({ "role": "assistant", "content": text })
            } else {
                let content = if text.trim().is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                };
                json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": tool_calls,
                })
            }
        }
        MessageRole::Tool => {
            let tool_call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                LlmError::InvalidResponse("tool message is missing tool_call_id".to_string())
            })?;
            let mut wire = json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": text,
            });
            if let Some(name) = message.tool_name.as_deref() {
                wire["name"] = json!(name);
            }
            wire
        }
    };
    Ok(wire)
}

fn to_wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

#[derive(Debug, Deserialize)]
struct WireChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireAssistantMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, LlmError> {
    let parsed: WireChatResponse = serde_json::from_str(raw)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.filter(|text| !text.is_empty()) {
        content.push(ContentBlock::Text { text });
    }
    for (index, call) in choice.message.tool_calls.into_iter().enumerate() {
        // Providers disagree on whether arguments arrive as a JSON string or an object.
        let arguments = match call.function.arguments {
            Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            Value::Null => json!({}),
            other => other,
        };
        content.push(ContentBlock::ToolCall {
            id: call
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("call_{index}")),
            name: call.function.name,
            arguments,
        });
    }

    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message: Message::assistant_blocks(content),
        finish_reason: choice.finish_reason,
        usage,
    })
}
