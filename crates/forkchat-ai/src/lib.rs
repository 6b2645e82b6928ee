//! Chat message model and model-provider clients used by the forkchat engine.
mod openai_compat;
mod retry;
mod types;

pub use openai_compat::{OpenAiCompatClient, OpenAiCompatConfig, DEFAULT_API_BASE};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, LlmError, Message,
    MessageRole, ToolCall, ToolDefinition,
};
