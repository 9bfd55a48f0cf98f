pub mod embeddings;
pub mod judge;
pub mod memory;
pub mod prompt;
pub mod providers;
pub mod session;
pub mod tools;
pub mod turn;

pub use embeddings::{EmbeddingProvider, OllamaEmbeddings};
pub use judge::{JudgePolicy, Judgement, SafetyJudge, Verdict, parse_verdict};
pub use memory::{
    LongTermMemory, MemoryMetadata, RecencyDecay, RetrievalQuery, ScoredMemory, ShortTermMemory,
};
pub use providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    OllamaProvider, OpenAiProvider, ToolDefinition,
};
pub use session::{Health, SessionManager, build_tools};
pub use tools::{KnowledgeGraph, Tool, ToolContext, ToolExecutor, ToolOutput};
pub use turn::{TurnController, TurnOutcome, TurnSettings, TurnStep};
