use serde::{Deserialize, Serialize};

/// One entry of a conversation message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set once the message may be shown to the user. Assistant free text only
    /// becomes visible when the safety judge releases it.
    #[serde(default)]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// A model request to run a single named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            visible: true,
            usage: None,
        }
    }

    /// Assistant output as produced by the model, not yet visible.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
            visible: false,
            usage: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            visible: false,
            usage: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            visible: false,
            usage: None,
        }
    }

    /// The text content if it holds anything besides whitespace.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn has_text(&self) -> bool {
        self.text().is_some()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn released(mut self) -> Self {
        self.visible = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_are_visible_immediately() {
        let msg = Message::user("Hello.");
        assert_eq!(msg.role, Role::User);
        assert!(msg.visible);
        assert_eq!(msg.text(), Some("Hello."));
    }

    #[test]
    fn assistant_messages_start_hidden() {
        let msg = Message::assistant(Some("Hi there".into()), Vec::new());
        assert!(!msg.visible);
        assert!(msg.released().visible);
    }

    #[test]
    fn whitespace_content_is_not_text() {
        let msg = Message::assistant(Some("  \n ".into()), Vec::new());
        assert!(!msg.has_text());
        assert!(msg.text().is_none());
    }

    #[test]
    fn tool_result_carries_back_reference() {
        let msg = Message::tool_result("call_1", "Task added successfully! 'buy milk'");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(!msg.visible);
    }

    #[test]
    fn usage_add_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage {
            input_tokens: 10,
            output_tokens: 3,
        });
        total.add(&Usage {
            input_tokens: 5,
            output_tokens: 2,
        });
        assert_eq!(total.input_tokens, 15);
        assert_eq!(total.output_tokens, 5);
    }

    #[test]
    fn serializes_role_lowercase() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
    }
}
