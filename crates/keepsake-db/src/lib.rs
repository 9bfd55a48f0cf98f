pub mod memory_store;
pub mod migrations;
pub mod session_store;
pub mod vector;

pub use memory_store::{MemoryRecord, MemoryStore, NewMemoryRecord};
pub use session_store::SessionStore;
pub use vector::{blob_to_vec, cosine_distance, vec_to_blob};
