//! Model invocation seam.

mod cli;

pub use cli::CliModelClient;

use async_trait::async_trait;

use crate::error::RlmResult;

/// One-shot model invocation: prompt in, response text out.
///
/// Failures (non-success from the underlying service, timeout) surface as
/// errors; callers decide whether that is fatal.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, prompt: &str, model_override: Option<&str>) -> RlmResult<String>;
}
