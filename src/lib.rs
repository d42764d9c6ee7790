//! # rlm-engine
//!
//! A recursive language model (RLM) control core: the engine drives an LLM
//! through a bounded, observable loop over a context too large to paste into
//! prompt tokens. Each step the model receives the task, an environment
//! summary, and the previous observation; it answers with either a terminal
//! marker (`FINAL(...)` / `FINAL_VAR(name)`) or ```repl``` blocks of commands
//! that the engine executes against a restricted environment — context
//! search/read, document retrieval, and depth-gated recursive sub-queries —
//! feeding the results back as the next observation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rlm_engine::{CliModelClient, RlmConfig, RlmController, RlmEnvironment, RunLog};
//!
//! # async fn run() -> rlm_engine::RlmResult<()> {
//! let config = RlmConfig::from_env();
//! let log = RunLog::stdout();
//! let client = Arc::new(CliModelClient::new(&config, log.clone()));
//!
//! let context = std::fs::read_to_string("big.txt")?;
//! let mut env = RlmEnvironment::new(context, None, client.clone(), &config);
//!
//! let controller = RlmController::new(client, config, log);
//! let outcome = controller.run("What changed in chapter 3?", &mut env).await?;
//! println!("{:?}", outcome.answer());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`parser`] | Terminal-marker detection and ```repl``` block extraction |
//! | [`prompt`] | Step, sub-call, and batched-sub-call prompt assembly |
//! | [`script`] | The REPL command language: grammar and parser |
//! | [`env`] | Execution environment: bindings, primitives, per-block timeout, sub-call orchestration |
//! | [`controller`] | The step state machine driving the loop |
//! | [`client`] | `ModelClient` seam + CLI subprocess adapter |
//! | [`index`] | `DocumentIndex` seam for the full-text library |
//! | [`runlog`] | Structured run logging with pluggable sinks |
//! | [`config`] | `RlmConfig` with environment overrides |
//! | [`error`] | `RlmError` / `RlmResult` |
//!
//! The recursion-depth ceiling is shared across every sub-call style, the
//! deferred-call registry redeems each handle exactly once, and parallel
//! fan-out is bounded by a configurable worker cap with results returned in
//! request order. The environment limits the vocabulary available to
//! model-written code; it is a convenience boundary, not a security boundary.

pub mod client;
pub mod config;
pub mod controller;
pub mod env;
pub mod error;
pub mod index;
pub mod parser;
pub mod prompt;
pub mod runlog;
pub mod script;
pub mod types;
pub mod util;

pub use client::{CliModelClient, ModelClient};
pub use config::RlmConfig;
pub use controller::{RlmController, RunOutcome};
pub use env::{RlmEnvironment, Variable};
pub use error::{RlmError, RlmResult};
pub use runlog::RunLog;
pub use types::*;
