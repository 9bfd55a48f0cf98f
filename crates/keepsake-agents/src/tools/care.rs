//! Demo care-plan tools. Both return fixed synthetic records and leave the
//! conversation state alone.

use async_trait::async_trait;
use keepsake_common::Result;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolOutput};

pub struct GetDiagnosis;

#[async_trait]
impl Tool for GetDiagnosis {
    fn name(&self) -> &'static str {
        "get_diagnosis"
    }

    fn description(&self) -> &'static str {
        "Get a synthetic diagnosis summary for the user."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _context: &ToolContext<'_>, _args: Value) -> Result<ToolOutput> {
        let diagnosis = json!({
            "diagnosis_name": "Neuroadaptive Fatigue Syndrome (NFS)",
            "confidence_level": "moderate",
            "summary": "The reported symptom pattern is consistent with a functional, \
                non-structural dysregulation of cognitive energy management.",
            "notes": [
                "No structural abnormalities detected",
                "Symptoms appear context-dependent and stress-related",
                "Recommended longitudinal observation"
            ],
            "date": "2025-01-15"
        });
        Ok(ToolOutput::success(diagnosis.to_string()))
    }
}

pub struct GetTreatment;

#[async_trait]
impl Tool for GetTreatment {
    fn name(&self) -> &'static str {
        "get_treatment"
    }

    fn description(&self) -> &'static str {
        "Get the treatment plan for the user."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _context: &ToolContext<'_>, _args: Value) -> Result<ToolOutput> {
        let treatment = json!({
            "treatment_name": "Neurocognitive Regulation Program (NRP)",
            "components": [
                "45-minute cognitive activity blocks",
                "structured active breaks",
                "daily mental energy level logging",
                "evening digital disengagement routine"
            ],
            "nutrition_plan": {
                "plan_name": "Energy-Stable Nutrition Plan",
                "guidelines": [
                    "Regular meal timing",
                    "Balanced macronutrient intake",
                    "Avoid long fasting periods during high cognitive demand"
                ],
                "example_meals": [
                    "Whole grains with vegetables and protein",
                    "Light evening meals",
                    "Hydration-focused snacks"
                ],
                "intended_effect": "Support sustained energy and reduce fatigue fluctuations",
                "date": "2025-01-15"
            },
            "duration": "8 weeks",
            "expected_outcome": "Progressive improvement in mental clarity and reduced perceived fatigue.",
            "date": "2025-01-15"
        });
        Ok(ToolOutput::success(treatment.to_string()))
    }
}
