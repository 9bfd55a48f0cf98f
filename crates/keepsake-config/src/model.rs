use std::path::PathBuf;
use std::str::FromStr;

use keepsake_common::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BLOCKED_MESSAGE: &str = "⚠️ Content blocked due to safety concerns.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub agent: AgentConfig,
    pub judge: JudgeConfig,
    pub memory: MemoryConfig,
    /// Directory for the SQLite databases. Defaults to `~/.keepsake/data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    Ollama,
    Openai,
}

impl FromStr for LlmProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::Openai),
            other => Err(Error::Config(format!("unknown model server: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Ollama,
            model: "llama3.1".to_string(),
            base_url: None,
            api_key: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    /// Expected vector length. Embeddings of another length are rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimensions: Some(768),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Number of trailing log messages sent to the model.
    pub history_window: usize,
    pub max_tool_iterations: usize,
    /// Enabled tool names. `None` enables every built-in tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            history_window: 20,
            max_tool_iterations: 10,
            tools: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub prohibited_categories: Vec<String>,
    pub blocked_message: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prohibited_categories: [
                "violence or self-harm",
                "sexual content",
                "hate speech or harassment",
                "illegal activities",
                "dangerous medical advice",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            blocked_message: DEFAULT_BLOCKED_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// No memory tools are bound.
    Off,
    /// Only the short-term cache.
    ShortTerm,
    /// Short-term cache plus the long-term store.
    #[default]
    Full,
}

impl MemoryMode {
    pub fn short_term_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    pub fn long_term_enabled(self) -> bool {
        matches!(self, Self::Full)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyUnit {
    Seconds,
    Minutes,
    #[default]
    Hours,
    Days,
}

impl RecencyUnit {
    pub fn seconds(self) -> f64 {
        match self {
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3_600.0,
            Self::Days => 86_400.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalWeights {
    pub importance: f64,
    pub recency: f64,
    pub similarity: f64,
    pub num_results: usize,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            importance: 0.0,
            recency: 0.0,
            similarity: 1.0,
            num_results: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub mode: MemoryMode,
    /// Maximum number of transient short-term entries.
    pub short_term_capacity: usize,
    /// Write entries evicted from the short-term cache to the long-term store.
    pub promote_evicted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    pub retrieval: RetrievalWeights,
    /// Recency multiplier applied per elapsed `recency_unit`.
    pub recency_decay_rate: f64,
    pub recency_unit: RecencyUnit,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mode: MemoryMode::Full,
            short_term_capacity: 10,
            promote_evicted: false,
            db_path: None,
            retrieval: RetrievalWeights::default(),
            recency_decay_rate: 0.995,
            recency_unit: RecencyUnit::Hours,
        }
    }
}

impl AppConfig {
    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(Error::Config("llm.model must not be empty".into()));
        }
        if self.llm.provider == LlmProviderKind::Openai
            && self.llm.api_key.as_deref().is_none_or(|k| k.trim().is_empty())
        {
            return Err(Error::Config(
                "llm.api_key is required for the openai provider".into(),
            ));
        }
        if self.agent.history_window == 0 {
            return Err(Error::Config("agent.history_window must be > 0".into()));
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(Error::Config("agent.max_tool_iterations must be > 0".into()));
        }
        if self.memory.short_term_capacity == 0 {
            return Err(Error::Config("memory.short_term_capacity must be > 0".into()));
        }
        if self.embedding.dimensions == Some(0) {
            return Err(Error::Config("embedding.dimensions must be > 0".into()));
        }
        let rate = self.memory.recency_decay_rate;
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(Error::Config(format!(
                "memory.recency_decay_rate must be in (0, 1], got {rate}"
            )));
        }
        let weights = &self.memory.retrieval;
        for (name, value) in [
            ("importance", weights.importance),
            ("recency", weights.recency),
            ("similarity", weights.similarity),
        ] {
            if !value.is_finite() {
                return Err(Error::Config(format!(
                    "memory.retrieval.{name} must be finite"
                )));
            }
        }
        if self.judge.enabled && self.judge.blocked_message.trim().is_empty() {
            return Err(Error::Config("judge.blocked_message must not be empty".into()));
        }
        Ok(())
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".keepsake")
                .join("data")
        })
    }

    pub fn memory_db_path(&self) -> PathBuf {
        self.memory
            .db_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("memory.db"))
    }

    pub fn sessions_db_path(&self) -> PathBuf {
        self.data_dir().join("sessions.db")
    }
}
