use std::sync::Arc;

use async_trait::async_trait;
use keepsake_common::Result;
use serde_json::{Value, json};
use tracing::warn;

use super::{Tool, ToolContext, ToolOutput, required_str};

/// A graph database that answers natural-language questions.
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    async fn query(&self, question: &str) -> Result<String>;
}

pub struct QueryKnowledgeGraph {
    graph: Arc<dyn KnowledgeGraph>,
}

impl QueryKnowledgeGraph {
    pub fn new(graph: Arc<dyn KnowledgeGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Tool for QueryKnowledgeGraph {
    fn name(&self) -> &'static str {
        "query_knowledge_graph"
    }

    fn description(&self) -> &'static str {
        "Ask the social knowledge graph about the people, places and events in \
         the user's life and how they relate."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question in plain language."
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, _context: &ToolContext<'_>, args: Value) -> Result<ToolOutput> {
        let question = required_str(&args, "question")?;
        match self.graph.query(question).await {
            Ok(answer) => Ok(ToolOutput::success(answer)),
            Err(e) => {
                warn!("knowledge graph query failed: {e}");
                Ok(ToolOutput::error(format!("Error querying knowledge graph: {e}")))
            }
        }
    }
}
