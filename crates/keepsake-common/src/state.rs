//! Per-session conversation state and its merge policy.
//!
//! Tools never mutate the state directly. They return a [`StateUpdate`] and
//! the turn controller folds it in with [`ConversationState::apply`]:
//!
//! | field                 | policy  |
//! |-----------------------|---------|
//! | `messages`            | append  |
//! | `tasks`               | append  |
//! | `symptoms`            | append  |
//! | `tools_used`          | append  |
//! | `short_term_memories` | replace |
//! | `long_term_memories`  | replace |
//!
//! `pending_response` is owned by the turn controller and untouched by updates.

use serde::{Deserialize, Serialize};

use crate::memory::MemoryEntry;
use crate::message::{Message, Role, ToolCallRequest};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    /// Assistant output buffered until the safety judge rules on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_response: Option<Message>,
    #[serde(default)]
    pub short_term_memories: Vec<MemoryEntry>,
    /// Contents returned by the most recent long-term retrieval.
    #[serde(default)]
    pub long_term_memories: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub tasks: Vec<String>,
    pub symptoms: Vec<String>,
    pub tools_used: Vec<String>,
    pub short_term_memories: Option<Vec<MemoryEntry>>,
    pub long_term_memories: Option<Vec<String>>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.tasks.is_empty()
            && self.symptoms.is_empty()
            && self.tools_used.is_empty()
            && self.short_term_memories.is_none()
            && self.long_term_memories.is_none()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_tool_used(mut self, name: impl Into<String>) -> Self {
        self.tools_used.push(name.into());
        self
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an update into the state following the per-field merge policy.
    pub fn apply(mut self, update: StateUpdate) -> Self {
        self.messages.extend(update.messages);
        self.tasks.extend(update.tasks);
        self.symptoms.extend(update.symptoms);
        self.tools_used.extend(update.tools_used);
        if let Some(memories) = update.short_term_memories {
            self.short_term_memories = memories;
        }
        if let Some(memories) = update.long_term_memories {
            self.long_term_memories = memories;
        }
        self
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Index of the most recent user-authored message.
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    /// The first tool call of the most recent assistant message that has no
    /// matching tool result after it.
    pub fn next_pending_tool_call(&self) -> Option<&ToolCallRequest> {
        let idx = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)?;
        let answered: Vec<&str> = self.messages[idx + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        self.messages[idx]
            .tool_calls
            .iter()
            .find(|call| !answered.contains(&call.id.as_str()))
    }

    /// Messages the user may see, in log order.
    pub fn visible_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.visible)
    }
}
