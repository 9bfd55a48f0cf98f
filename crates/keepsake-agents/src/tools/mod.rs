use async_trait::async_trait;
use keepsake_common::{ConversationState, Error, Message, Result, StateUpdate, ToolCallRequest};
use serde_json::Value;
use tracing::{info, warn};

use crate::providers::ToolDefinition;

pub mod care;
pub mod knowledge_graph;
pub mod memory;
pub mod symptoms;
pub mod tasks;
pub mod time;

pub use care::{GetDiagnosis, GetTreatment};
pub use knowledge_graph::{KnowledgeGraph, QueryKnowledgeGraph};
pub use memory::{RetrieveLongTermMemory, SaveLongTermMemory, SaveShortTermMemory};
pub use symptoms::{AddSymptom, GetListOfSymptoms};
pub use tasks::{AddTask, GetListOfTasks};
pub use time::CheckCurrentTime;

/// What a tool can see while it runs. Tools read the state but never write
/// it; changes travel back in [`ToolOutput::update`].
pub struct ToolContext<'a> {
    pub session_id: &'a str,
    pub tool_call_id: &'a str,
    pub state: &'a ConversationState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    pub update: StateUpdate,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            update: StateUpdate::default(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            update: StateUpdate::default(),
        }
    }

    pub fn with_update(mut self, update: StateUpdate) -> Self {
        self.update = update;
        self
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn input_schema(&self) -> Value;

    async fn execute(&self, context: &ToolContext<'_>, args: Value) -> Result<ToolOutput>;
}

/// Resolves tool-call requests by name and runs them.
#[derive(Default)]
pub struct ToolExecutor {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        if self.find(tool.name()).is_some() {
            warn!("tool '{}' registered twice, keeping the first", tool.name());
            return;
        }
        info!("registered tool: {}", tool.name());
        self.tools.push(tool);
    }

    /// Keep only the tools whose names appear in `enabled`.
    pub fn retain(&mut self, enabled: &[String]) {
        for name in enabled {
            if self.find(name).is_none() {
                warn!("enabled tool '{}' is not registered", name);
            }
        }
        self.tools
            .retain(|tool| enabled.iter().any(|name| name == tool.name()));
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Run one tool call against `state`, returning the tool-result message
    /// and the state update the tool asked for (with the tool recorded in
    /// `tools_used`).
    pub async fn execute(
        &self,
        session_id: &str,
        call: &ToolCallRequest,
        state: &ConversationState,
    ) -> Result<(Message, StateUpdate)> {
        let tool = self
            .find(&call.name)
            .ok_or_else(|| Error::Tool(format!("unknown tool: {}", call.name)))?;

        let context = ToolContext {
            session_id,
            tool_call_id: &call.id,
            state,
        };
        let output = tool.execute(&context, call.arguments.clone()).await?;
        if output.is_error {
            warn!(tool = %call.name, "tool reported an error: {}", output.content);
        } else {
            info!(tool = %call.name, "tool executed");
        }

        let message = Message::tool_result(&call.id, output.content);
        Ok((message, output.update.with_tool_used(call.name.as_str())))
    }
}

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Tool(format!("missing or invalid '{key}' argument")))
}

/// Accept `true`, `"True"`, `"yes"`, `1` and the like.
pub(crate) fn flexible_bool(value: Option<&Value>) -> Result<bool> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_i64().is_some_and(|n| n != 0)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            other => Err(Error::Tool(format!("'{other}' is not a boolean"))),
        },
        Some(other) => Err(Error::Tool(format!("{other} is not a boolean"))),
    }
}

/// Accept an integer or a numeric string.
pub(crate) fn flexible_int(value: Option<&Value>) -> Result<Option<i64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| Error::Tool(format!("'{s}' is not a number"))),
        Some(other) => Err(Error::Tool(format!("{other} is not a number"))),
    }
}
