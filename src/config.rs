//! Engine configuration with environment-variable overrides.

use serde::{Deserialize, Serialize};

use crate::util::{parse_env_u64, parse_env_usize};

/// Output format the model CLI is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
}

/// Configuration for one engine run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlmConfig {
    /// Step budget for the control loop
    pub max_steps: usize,
    /// Wall-clock limit for one REPL block, in milliseconds
    pub repl_timeout_ms: u64,
    /// Wall-clock limit for one model CLI call, in milliseconds
    pub cli_timeout_ms: u64,
    /// Sub-call nesting ceiling
    pub max_recursion_depth: usize,
    /// Default worker cap for parallel sub-call fan-out
    pub max_subcall_concurrency: usize,
    /// Cap applied to captured REPL output and the observation echoed into prompts
    pub output_trunc_chars: usize,
    /// Fixed phrase emitted after the loop ends, answer or not
    pub completion_phrase: String,
    /// Model for main-loop invocations
    pub model: String,
    /// Model for recursive sub-calls; falls back to `model` when absent
    pub sub_model: Option<String>,
    /// CLI command used by the model client
    pub llm_cmd: String,
    /// Argument template for the CLI, with `{model}` and `{format}` placeholders
    pub llm_args_template: String,
    /// Whether the CLI emits plain text or a JSON envelope
    pub llm_output: OutputFormat,
}

impl Default for RlmConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            repl_timeout_ms: 2_000,
            cli_timeout_ms: 180_000,
            max_recursion_depth: 1,
            max_subcall_concurrency: 6,
            output_trunc_chars: 8_000,
            completion_phrase: "RLM TASK COMPLETE".into(),
            model: "devstral".into(),
            sub_model: None,
            llm_cmd: "mistral".into(),
            llm_args_template: "chat --model {model} --stdin --output {format}".into(),
            llm_output: OutputFormat::Text,
        }
    }
}

impl RlmConfig {
    /// Defaults overridden by `RLM_*` environment variables where set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_steps: parse_env_usize("RLM_MAX_STEPS", defaults.max_steps),
            repl_timeout_ms: parse_env_u64("RLM_REPL_TIMEOUT_MS", defaults.repl_timeout_ms),
            cli_timeout_ms: parse_env_u64("RLM_CLI_TIMEOUT_MS", defaults.cli_timeout_ms),
            max_recursion_depth: parse_env_usize("RLM_MAX_RECURSION_DEPTH", defaults.max_recursion_depth),
            max_subcall_concurrency: parse_env_usize(
                "RLM_MAX_SUBCALL_CONCURRENCY",
                defaults.max_subcall_concurrency,
            ),
            output_trunc_chars: parse_env_usize("RLM_OUTPUT_TRUNC_CHARS", defaults.output_trunc_chars),
            completion_phrase: std::env::var("RLM_COMPLETION_PHRASE")
                .unwrap_or(defaults.completion_phrase),
            model: std::env::var("RLM_LLM_MODEL").unwrap_or(defaults.model),
            sub_model: std::env::var("RLM_LLM_SUBMODEL").ok(),
            llm_cmd: std::env::var("RLM_LLM_CMD").unwrap_or(defaults.llm_cmd),
            llm_args_template: std::env::var("RLM_LLM_ARGS_TEMPLATE")
                .unwrap_or(defaults.llm_args_template),
            llm_output: match std::env::var("RLM_LLM_OUTPUT").as_deref() {
                Ok("json") | Ok("JSON") => OutputFormat::Json,
                _ => defaults.llm_output,
            },
        }
    }

    /// Model name used for sub-calls
    pub fn sub_model(&self) -> &str {
        self.sub_model.as_deref().unwrap_or(&self.model)
    }
}
