pub mod error;
pub mod memory;
pub mod message;
pub mod state;

pub use error::{Error, Result};
pub use memory::MemoryEntry;
pub use message::{Message, Role, ToolCallRequest, Usage};
pub use state::{ConversationState, StateUpdate};
