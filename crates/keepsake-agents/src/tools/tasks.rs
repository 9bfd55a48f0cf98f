use async_trait::async_trait;
use keepsake_common::{Result, StateUpdate};
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolOutput, required_str};

pub struct AddTask;

#[async_trait]
impl Tool for AddTask {
    fn name(&self) -> &'static str {
        "add_task"
    }

    fn description(&self) -> &'static str {
        "Add a task to the user's list of tasks."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "new_task": {
                    "type": "string",
                    "description": "The task to be added."
                }
            },
            "required": ["new_task"]
        })
    }

    async fn execute(&self, _context: &ToolContext<'_>, args: Value) -> Result<ToolOutput> {
        let task = required_str(&args, "new_task")?.trim();
        Ok(
            ToolOutput::success(format!("Task added successfully! '{task}'")).with_update(
                StateUpdate {
                    tasks: vec![task.to_string()],
                    ..Default::default()
                },
            ),
        )
    }
}

pub struct GetListOfTasks;

#[async_trait]
impl Tool for GetListOfTasks {
    fn name(&self) -> &'static str {
        "get_list_of_tasks"
    }

    fn description(&self) -> &'static str {
        "Get the user's list of tasks. Reports when there are no tasks yet."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, context: &ToolContext<'_>, _args: Value) -> Result<ToolOutput> {
        Ok(ToolOutput::success(bullet_list(
            "Tasks",
            "There are no tasks yet.",
            &context.state.tasks,
        )))
    }
}

pub(crate) fn bullet_list(heading: &str, empty: &str, items: &[String]) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    let mut out = format!("{heading}:");
    for item in items {
        out.push_str("\n- ");
        out.push_str(item);
    }
    out
}
