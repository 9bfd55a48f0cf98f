use async_trait::async_trait;
use chrono::Local;
use keepsake_common::Result;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolOutput};

pub struct CheckCurrentTime;

#[async_trait]
impl Tool for CheckCurrentTime {
    fn name(&self) -> &'static str {
        "check_current_time"
    }

    fn description(&self) -> &'static str {
        "Check the current local date and time. Present it to the user in a \
         human-readable form, e.g. 'it is 12:00 PM on October 1st, 2023'."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _context: &ToolContext<'_>, _args: Value) -> Result<ToolOutput> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S");
        Ok(ToolOutput::success(format!("Current time is: {now}")))
    }
}
