use serde::{Deserialize, Serialize};

use crate::index::IndexStats;

// ─── Parser Output ──────────────────────────────────────────────────────────

/// A terminal marker extracted from one model response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalAnswer {
    /// FINAL(literal answer text)
    Text(String),
    /// FINAL_VAR(variable_name)
    Var(String),
}

// ─── Spans & Sub-calls ──────────────────────────────────────────────────────

/// A half-open character span into the context text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One unit of work for a recursive sub-call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcallRequest {
    pub snippet: String,
    pub question: String,
}

impl SubcallRequest {
    pub fn new(snippet: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            snippet: snippet.into(),
            question: question.into(),
        }
    }
}

// ─── Execution ──────────────────────────────────────────────────────────────

/// Outcome of running one REPL block
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub succeeded: bool,
    /// Capture-buffer contents, truncated
    pub printed: String,
    /// Rendered error description when the block failed, truncated
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(printed: String) -> Self {
        Self {
            succeeded: true,
            printed,
            error: None,
        }
    }

    pub fn failed(printed: String, error: String) -> Self {
        Self {
            succeeded: false,
            printed,
            error: Some(error),
        }
    }
}

// ─── Environment Summary ────────────────────────────────────────────────────

/// What the prompt builder gets to say about the environment
#[derive(Debug, Clone, Serialize)]
pub struct EnvSummary {
    pub context_len: usize,
    pub index_stats: Option<IndexStats>,
}
