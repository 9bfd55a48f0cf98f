use keepsake_common::{MemoryEntry, Message, Role};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a warm, patient companion. Keep replies short \
and clear. Use the tools available to you to keep track of the user's tasks, symptoms and \
memories, and call at most one tool at a time.";

/// Compose the system prompt from the configured instructions and the
/// session's short-term memories.
pub fn build_system_prompt(system_prompt: Option<&str>, short_term: &[MemoryEntry]) -> String {
    let mut parts = vec![system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string()];
    if let Some(memories) = render_short_term_memories(short_term) {
        parts.push(memories);
    }
    parts.join("\n\n")
}

/// Render the cache as a bullet list, `None` when it is empty.
pub fn render_short_term_memories(entries: &[MemoryEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut out = String::from("Short Term Memories:");
    for entry in entries {
        out.push_str("\n- ");
        out.push_str(&entry.content);
        if !entry.tags.is_empty() {
            let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
            out.push_str(&format!(" [{}]", tags.join(", ")));
        }
    }
    Some(out)
}

/// The trailing `size` log entries sent to the model. System entries are
/// skipped. A window that would open on tool results is widened back to the
/// assistant entry that requested them, so it may exceed `size`.
pub fn history_window(messages: &[Message], size: usize) -> Vec<&Message> {
    let conversational: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();
    let mut start = conversational.len().saturating_sub(size);
    while start > 0 && start < conversational.len() && conversational[start].role == Role::Tool {
        start -= 1;
    }
    conversational[start..]
        .iter()
        .copied()
        .skip_while(|m| m.role == Role::Tool)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_common::ToolCallRequest;
    use serde_json::json;

    #[test]
    fn system_prompt_defaults_and_memories() {
        let prompt = build_system_prompt(None, &[]);
        assert_eq!(prompt, DEFAULT_SYSTEM_PROMPT);

        let memories = vec![
            MemoryEntry::new("The user's name is Martha.")
                .with_tags(["user_info".to_string()].into_iter().collect()),
            MemoryEntry::new("Likes tea."),
        ];
        let prompt = build_system_prompt(Some("Be kind."), &memories);
        assert!(prompt.starts_with("Be kind."));
        assert!(prompt.contains("Short Term Memories:"));
        assert!(prompt.contains("- The user's name is Martha. [user_info]"));
        assert!(prompt.contains("- Likes tea."));
    }

    #[test]
    fn window_keeps_trailing_messages() {
        let messages: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        let window = history_window(&messages, 3);
        let texts: Vec<_> = window.iter().filter_map(|m| m.text()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    fn tool_exchange() -> Vec<Message> {
        vec![
            Message::user("add a task"),
            Message::assistant(
                None,
                vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "add_task".into(),
                    arguments: json!({"new_task": "x"}),
                }],
            ),
            Message::tool_result("c1", "Task added successfully! 'x'"),
        ]
    }

    #[test]
    fn window_widens_to_include_the_tool_call() {
        let mut messages = tool_exchange();
        messages.push(Message::assistant(Some("Done.".into()), vec![]));
        let window = history_window(&messages, 2);
        let roles: Vec<Role> = window.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(window[2].text(), Some("Done."));
    }

    #[test]
    fn single_entry_window_after_tool_result_is_not_empty() {
        let messages = tool_exchange();
        let window = history_window(&messages, 1);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].tool_calls[0].id, "c1");
        assert_eq!(window[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn leading_tool_result_without_its_call_is_dropped() {
        let messages = vec![
            Message::tool_result("c0", "stale"),
            Message::user("hello"),
        ];
        let window = history_window(&messages, 5);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].role, Role::User);
    }

    #[test]
    fn window_larger_than_log_returns_everything() {
        let messages = vec![Message::system("ignored"), Message::user("hi")];
        let window = history_window(&messages, 20);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].role, Role::User);
    }
}
