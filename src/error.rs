use thiserror::Error;

#[derive(Error, Debug)]
pub enum RlmError {
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("Model call timed out after {timeout_ms}ms")]
    ModelTimeout { timeout_ms: u64 },

    #[error("Script error: {0}")]
    Script(#[from] crate::script::ScriptError),

    #[error("Variable '{name}' not found. Available: {available:?}")]
    UnknownVariable { name: String, available: Vec<String> },

    #[error("Unknown doc id: {0}")]
    UnknownDoc(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type RlmResult<T> = Result<T, RlmError>;
