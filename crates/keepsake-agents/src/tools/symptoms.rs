use async_trait::async_trait;
use keepsake_common::{Result, StateUpdate};
use serde_json::{Value, json};

use super::tasks::bullet_list;
use super::{Tool, ToolContext, ToolOutput, required_str};

pub struct AddSymptom;

#[async_trait]
impl Tool for AddSymptom {
    fn name(&self) -> &'static str {
        "add_symptom"
    }

    fn description(&self) -> &'static str {
        "Record a symptom the user reports."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "new_symptom": {
                    "type": "string",
                    "description": "The symptom to be added."
                }
            },
            "required": ["new_symptom"]
        })
    }

    async fn execute(&self, _context: &ToolContext<'_>, args: Value) -> Result<ToolOutput> {
        let symptom = required_str(&args, "new_symptom")?.trim();
        Ok(
            ToolOutput::success(format!("Symptom added successfully! '{symptom}'")).with_update(
                StateUpdate {
                    symptoms: vec![symptom.to_string()],
                    ..Default::default()
                },
            ),
        )
    }
}

pub struct GetListOfSymptoms;

#[async_trait]
impl Tool for GetListOfSymptoms {
    fn name(&self) -> &'static str {
        "get_list_of_symptoms"
    }

    fn description(&self) -> &'static str {
        "Get the symptoms recorded so far. Reports when there are none yet."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, context: &ToolContext<'_>, _args: Value) -> Result<ToolOutput> {
        Ok(ToolOutput::success(bullet_list(
            "Symptoms",
            "There are no symptoms yet.",
            &context.state.symptoms,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_common::ConversationState;

    #[tokio::test]
    async fn add_and_list_symptoms() {
        let mut state = ConversationState::new();
        let ctx = ToolContext {
            session_id: "s1",
            tool_call_id: "call_1",
            state: &state,
        };
        let out = AddSymptom
            .execute(&ctx, json!({"new_symptom": "headache"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Symptom added successfully! 'headache'");

        state = state.apply(out.update);
        let ctx = ToolContext {
            session_id: "s1",
            tool_call_id: "call_2",
            state: &state,
        };
        let listed = GetListOfSymptoms.execute(&ctx, json!({})).await.unwrap();
        assert_eq!(listed.content, "Symptoms:\n- headache");
    }
}
