//! Generation engine: runs one conversational turn against a thread's checkpoint,
//! looping through model calls and tool executions, then persists the result.
use async_trait::async_trait;
use forkchat_ai::{LlmError, Message, ToolDefinition};
use forkchat_checkpoint::{CheckpointError, ThreadId};
use serde_json::Value;
use thiserror::Error;

mod runtime_tool_bridge;
mod runtime_turn_loop;
#[cfg(test)]
mod tests;

pub use runtime_turn_loop::AgentGenerationEngine;

/// Text returned as the reply when the final assistant message carries no text.
pub const EMPTY_REPLY_FALLBACK: &str = "I couldn't generate a textual response for this request.";

/// Model and loop settings for [`AgentGenerationEngine`].
///
/// # Examples
///
/// ```
/// use forkchat_agent::AgentConfig;
///
/// let config = AgentConfig {
///     model: "llama3.1:8b".to_string(),
///     max_turns: 4,
///     ..AgentConfig::default()
/// };
///
/// assert_eq!(config.max_turns, 4);
/// assert_eq!(config.temperature, Some(0.0));
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    /// Prepended to every model request. Never written into checkpoints.
    pub system_prompt: String,
    pub max_turns: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Upper bound on one whole run. `0` disables the bound.
    pub turn_timeout_ms: u64,
    pub tool_timeout_ms: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            system_prompt: "You are a helpful AI assistant.".to_string(),
            max_turns: 8,
            temperature: Some(0.0),
            max_tokens: None,
            turn_timeout_ms: 120_000,
            tool_timeout_ms: Some(30_000),
        }
    }
}

/// Outcome of a tool execution, fed back to the model as a tool message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolExecutionResult {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }

    /// Converts the payload to text for insertion into a tool message.
    pub fn as_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// A capability the model may call during a run (for example a web search).
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, arguments: Value) -> ToolExecutionResult;
}

/// What a run starts from.
#[derive(Debug, Clone, PartialEq)]
pub enum RunInput {
    /// Append one message to the thread's history, creating the thread if absent.
    Append(Message),
    /// Initial history for a thread that holds no messages yet.
    Seed(Vec<Message>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    /// The checkpoint as persisted after the run.
    pub history: Vec<Message>,
    /// Text of the newest assistant message.
    pub reply: String,
    /// Messages produced by the run itself (assistant and tool messages).
    pub new_messages: Vec<Message>,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Ai(#[from] LlmError),
    #[error("generation exceeded max turns ({0})")]
    MaxTurnsExceeded(usize),
    #[error("generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("thread '{thread_id}' already holds a conversation")]
    ThreadOccupied { thread_id: ThreadId },
    #[error("cannot seed a thread with an empty history")]
    EmptyHistory,
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Produces the next assistant reply for a thread and persists the updated
/// checkpoint. Nothing is written when a run fails.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn run(&self, thread_id: &ThreadId, input: RunInput)
        -> Result<RunOutput, GenerationError>;
}

/// Picks the reply text out of a history: the last assistant message's text,
/// or [`EMPTY_REPLY_FALLBACK`] when that text is blank or no assistant spoke.
pub fn extract_reply(history: &[Message]) -> String {
    let text = history
        .iter()
        .rev()
        .find(|message| message.role == forkchat_ai::MessageRole::Assistant)
        .map(Message::text_content)
        .unwrap_or_default();
    if text.trim().is_empty() {
        EMPTY_REPLY_FALLBACK.to_string()
    } else {
        text
    }
}
