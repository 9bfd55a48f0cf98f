pub mod long_term;
pub mod short_term;

pub use long_term::{
    LongTermMemory, MemoryMetadata, RecencyDecay, RetrievalQuery, ScoredMemory,
};
pub use short_term::ShortTermMemory;
