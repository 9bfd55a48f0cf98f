use async_trait::async_trait;
use keepsake_common::{Message, Result, Role, ToolCallRequest, Usage};
use serde::{Deserialize, Serialize};

pub mod ollama;
pub mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Trait for chat model integrations (Ollama, OpenAI-compatible servers).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "openai", "ollama").
    fn provider_id(&self) -> &str;

    /// Send a completion request and return the response.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Check if the provider is reachable and configured.
    async fn health_check(&self) -> Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessagePart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    Text(String),
    Parts(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessagePart::Text(text.into()),
        }
    }

    /// Plain text of the message, joining text blocks with newlines.
    pub fn text_content(&self) -> String {
        match &self.content {
            MessagePart::Text(text) => text.clone(),
            MessagePart::Parts(parts) => extract_text(parts),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let text = message.content.clone().unwrap_or_default();
        match message.role {
            Role::User => ChatMessage::text(ChatRole::User, text),
            Role::System => ChatMessage::text(ChatRole::System, text),
            Role::Assistant if message.tool_calls.is_empty() => {
                ChatMessage::text(ChatRole::Assistant, text)
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                if message.has_text() {
                    parts.push(ContentBlock::Text { text });
                }
                parts.extend(message.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                ChatMessage {
                    role: ChatRole::Assistant,
                    content: MessagePart::Parts(parts),
                }
            }
            Role::Tool => ChatMessage {
                role: ChatRole::Tool,
                content: MessagePart::Parts(vec![ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: text,
                }]),
            },
        }
    }
}

impl LlmResponse {
    pub fn text(&self) -> String {
        extract_text(&self.content)
    }

    pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCallRequest {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Convert into an assistant log entry. Empty text becomes `None`.
    pub fn into_message(self) -> Message {
        let text = self.text();
        let content = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        let tool_calls = self.tool_calls();
        Message::assistant(content, tool_calls).with_usage(self.usage)
    }
}

pub(crate) fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
