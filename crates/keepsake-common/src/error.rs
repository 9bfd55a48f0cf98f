use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Model invocation, routing and turn-level failures.
    #[error("agent error: {0}")]
    Agent(String),

    /// A tool could not be resolved or failed while executing.
    #[error("tool error: {0}")]
    Tool(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
