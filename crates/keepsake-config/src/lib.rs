pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AgentConfig, AppConfig, EmbeddingConfig, JudgeConfig, LlmConfig, LlmProviderKind,
    MemoryConfig, MemoryMode, RecencyUnit, RetrievalWeights,
};
