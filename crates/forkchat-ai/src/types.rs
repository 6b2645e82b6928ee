use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Speaker of a conversation message.
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A tool invocation requested by the model.
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
}

impl From<ToolCall> for ContentBlock {
    fn from(call: ToolCall) -> Self {
        Self::ToolCall {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

/// One entry of a conversation history.
///
/// Every field is owned, so `clone()` yields a value that shares no mutable
/// state with the original. Checkpoint branching relies on this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    fn text_message(role: MessageRole, text: String) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text }],
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(MessageRole::System, text.into())
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(MessageRole::User, text.into())
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::text_message(MessageRole::Assistant, text.into())
    }

    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: vec![ContentBlock::Text { text: text.into() }],
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            is_error,
        }
    }

    /// Joins the text blocks with newlines, skipping tool-call blocks.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolCall { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                ContentBlock::Text { .. } => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolCall { .. }))
    }

    /// Returns true when any text block contains `needle`.
    pub fn text_contains(&self, needle: &str) -> bool {
        self.content.iter().any(|block| match block {
            ContentBlock::Text { text } => text.contains(needle),
            ContentBlock::ToolCall { .. } => false,
        })
    }

    /// Replaces every occurrence of `needle` inside text blocks and returns the
    /// number of blocks that changed.
    pub fn replace_text(&mut self, needle: &str, replacement: &str) -> usize {
        if needle.is_empty() {
            return 0;
        }
        let mut changed = 0usize;
        for block in &mut self.content {
            if let ContentBlock::Text { text } = block {
                if text.contains(needle) {
                    *text = text.replace(needle, replacement);
                    changed += 1;
                }
            }
        }
        changed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub message: Message,
    pub finish_reason: Option<String>,
    pub usage: ChatUsage,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

/// Completion backend consumed by the generation engine.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ContentBlock, Message, MessageRole};

    #[test]
    fn unit_text_content_skips_tool_call_blocks() {
        let message = Message::assistant_blocks(vec![
            ContentBlock::Text {
                text: "first".to_string(),
            },
            ContentBlock::ToolCall {
                id: "1".to_string(),
                name: "web_search".to_string(),
                arguments: json!({ "query": "weather" }),
            },
            ContentBlock::Text {
                text: "second".to_string(),
            },
        ]);

        assert_eq!(message.text_content(), "first\nsecond");
        assert!(message.has_tool_calls());
        assert_eq!(message.tool_calls()[0].name, "web_search");
    }

    #[test]
    fn unit_replace_text_rewrites_only_matching_text_blocks() {
        let mut message = Message::user("what is the capital of France");
        let changed = message.replace_text("France", "Germany");

        assert_eq!(changed, 1);
        assert_eq!(message.text_content(), "what is the capital of Germany");
        assert_eq!(message.role, MessageRole::User);
    }

    #[test]
    fn regression_replace_text_with_empty_needle_is_noop() {
        let mut message = Message::user("hello");
        assert_eq!(message.replace_text("", "x"), 0);
        assert_eq!(message.text_content(), "hello");
    }

    #[test]
    fn unit_cloned_message_is_independent_of_original() {
        let original = Message::user("hi");
        let mut copy = original.clone();
        copy.replace_text("hi", "bye");

        assert_eq!(original.text_content(), "hi");
        assert_eq!(copy.text_content(), "bye");
    }

    #[test]
    fn unit_message_serde_omits_absent_tool_fields() {
        let encoded = serde_json::to_value(Message::user("hi")).expect("encode");
        assert_eq!(encoded["role"], "user");
        assert!(encoded.get("tool_call_id").is_none());
        let decoded: Message = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, Message::user("hi"));
    }
}
