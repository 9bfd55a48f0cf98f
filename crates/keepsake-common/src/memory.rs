use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_IMPORTANCE: u8 = 1;
pub const MAX_IMPORTANCE: u8 = 10;
pub const DEFAULT_IMPORTANCE: u8 = 5;

/// A short-term memory held in the conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub importance: u8,
    /// Permanent entries are never evicted from the short-term cache.
    pub keep: bool,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    /// A transient entry with default importance.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            tags: BTreeSet::new(),
            importance: DEFAULT_IMPORTANCE,
            keep: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = clamp_importance(importance as i64);
        self
    }

    pub fn permanent(mut self) -> Self {
        self.keep = true;
        self
    }
}

/// Clamp any integer onto the 1..=10 importance scale.
pub fn clamp_importance(value: i64) -> u8 {
    value.clamp(MIN_IMPORTANCE as i64, MAX_IMPORTANCE as i64) as u8
}

/// Split a comma separated tag list ("user_info, animals") into a set.
pub fn parse_tags(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
