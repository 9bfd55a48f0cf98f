use async_trait::async_trait;
use keepsake_common::memory::{clamp_importance, parse_tags};
use keepsake_common::{MemoryEntry, Result, StateUpdate};
use keepsake_config::RetrievalWeights;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Tool, ToolContext, ToolOutput, flexible_bool, flexible_int, required_str};
use crate::memory::{LongTermMemory, MemoryMetadata, RetrievalQuery, ShortTermMemory};

/// Writes to the short-term cache held in conversation state.
pub struct SaveShortTermMemory {
    capacity: usize,
    promote_to: Option<LongTermMemory>,
}

impl SaveShortTermMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            promote_to: None,
        }
    }

    /// Copy evicted entries into the long-term store.
    pub fn with_promotion(mut self, long_term: LongTermMemory) -> Self {
        self.promote_to = Some(long_term);
        self
    }

    async fn promote(&self, evicted: Vec<MemoryEntry>) {
        let Some(long_term) = &self.promote_to else {
            return;
        };
        for entry in evicted {
            let metadata = MemoryMetadata {
                tags: entry.tags,
                importance: Some(entry.importance),
                created_at: Some(entry.created_at),
            };
            match long_term.save(&entry.content, metadata).await {
                Ok(id) => info!(%id, "promoted evicted short-term memory"),
                Err(e) => warn!("failed to promote evicted short-term memory: {e}"),
            }
        }
    }
}

#[async_trait]
impl Tool for SaveShortTermMemory {
    fn name(&self) -> &'static str {
        "save_short_term_memory"
    }

    fn description(&self) -> &'static str {
        "Save a short memory or insight about the user into the Short Term (core) \
         Memories section. Call this on your own whenever the user shares something \
         relevant: name, age, interests, preferences, plans, or anything that helps \
         personalise future replies. Only the user's name should be kept forever."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "new_short_term_memory": {
                    "type": "string",
                    "description": "The memory to save. Keep it short, e.g. \"The user's name is Martha.\""
                },
                "keep_boolean": {
                    "type": "string",
                    "description": "\"True\" to keep the memory forever, otherwise \"False\"."
                },
                "tag": {
                    "type": "string",
                    "description": "Comma separated tags, e.g. \"user_info,user_preferences\"."
                }
            },
            "required": ["new_short_term_memory", "keep_boolean", "tag"]
        })
    }

    async fn execute(&self, context: &ToolContext<'_>, args: Value) -> Result<ToolOutput> {
        let content = required_str(&args, "new_short_term_memory")?.trim().to_string();
        let keep = flexible_bool(args.get("keep_boolean"))?;
        let tags = parse_tags(args.get("tag").and_then(Value::as_str).unwrap_or_default());

        let mut entry = MemoryEntry::new(content.clone()).with_tags(tags);
        if keep {
            entry = entry.permanent();
        }

        let mut cache =
            ShortTermMemory::from_entries(self.capacity, context.state.short_term_memories.clone());
        let evicted = cache.append(entry);
        self.promote(evicted).await;

        Ok(
            ToolOutput::success(format!("Short term memory saved: {content}")).with_update(
                StateUpdate {
                    short_term_memories: Some(cache.into_entries()),
                    ..Default::default()
                },
            ),
        )
    }
}

pub struct SaveLongTermMemory {
    long_term: LongTermMemory,
}

impl SaveLongTermMemory {
    pub fn new(long_term: LongTermMemory) -> Self {
        Self { long_term }
    }
}

#[async_trait]
impl Tool for SaveLongTermMemory {
    fn name(&self) -> &'static str {
        "save_long_term_memory"
    }

    fn description(&self) -> &'static str {
        "Save a significant, lasting fact about the user to Long Term Memory: their \
         name, important personal context, or preferences about how you should respond. \
         Do not use it for casual or temporary details; use short-term memory for those."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The memory to save."
                },
                "tag": {
                    "type": "string",
                    "description": "Comma separated tags, e.g. \"user_info,work_context\"."
                },
                "importance": {
                    "type": "string",
                    "description": "Importance from \"1\" to \"10\". Use \"5\" for typical memories."
                }
            },
            "required": ["content", "tag", "importance"]
        })
    }

    async fn execute(&self, _context: &ToolContext<'_>, args: Value) -> Result<ToolOutput> {
        let content = required_str(&args, "content")?.trim();
        let tags = parse_tags(args.get("tag").and_then(Value::as_str).unwrap_or_default());
        let importance = flexible_int(args.get("importance"))?.map(clamp_importance);

        let metadata = MemoryMetadata {
            tags,
            importance,
            created_at: None,
        };
        match self.long_term.save(content, metadata).await {
            Ok(_) => Ok(ToolOutput::success(format!(
                "Important memory saved to long-term storage: {content}"
            ))),
            Err(e) => {
                warn!("long-term save failed: {e}");
                Ok(ToolOutput::error(format!(
                    "Error saving memory to long-term storage: {e}"
                )))
            }
        }
    }
}

pub struct RetrieveLongTermMemory {
    long_term: LongTermMemory,
    weights: RetrievalWeights,
}

impl RetrieveLongTermMemory {
    pub fn new(long_term: LongTermMemory, weights: RetrievalWeights) -> Self {
        Self { long_term, weights }
    }
}

#[async_trait]
impl Tool for RetrieveLongTermMemory {
    fn name(&self) -> &'static str {
        "retrieve_long_term_memory"
    }

    fn description(&self) -> &'static str {
        "Search Long Term Memory. Call this when the user asks you to remember past \
         experiences, events or facts about their life. Phrase the query in the third \
         person and include the user's name when you know it."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _context: &ToolContext<'_>, args: Value) -> Result<ToolOutput> {
        let query = required_str(&args, "query")?;
        let request = RetrievalQuery::with_weights(query, &self.weights);

        match self.long_term.retrieve(&request).await {
            Ok(results) => {
                let contents: Vec<String> =
                    results.into_iter().map(|m| m.record.content).collect();
                let text = if contents.is_empty() {
                    format!("No memories found for query: {query}")
                } else {
                    let mut text =
                        format!("Retrieved {} memories for query: {query}\n", contents.len());
                    for (i, content) in contents.iter().enumerate() {
                        text.push_str(&format!("\n{}. {content}", i + 1));
                    }
                    text
                };
                Ok(ToolOutput::success(text).with_update(StateUpdate {
                    long_term_memories: Some(contents),
                    ..Default::default()
                }))
            }
            Err(e) => {
                warn!("long-term retrieval failed: {e}");
                Ok(
                    ToolOutput::error(format!("Error retrieving memories: {e}")).with_update(
                        StateUpdate {
                            long_term_memories: Some(Vec::new()),
                            ..Default::default()
                        },
                    ),
                )
            }
        }
    }
}
