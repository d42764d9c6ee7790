//! Recursive sub-call orchestration.
//!
//! Every path to the model from inside a REPL block goes through the
//! `SubcallManager`, which enforces one shared recursion-depth ceiling across
//! all invocation styles and owns the deferred-call registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::client::ModelClient;
use crate::config::RlmConfig;
use crate::error::{RlmError, RlmResult};
use crate::prompt;
use crate::types::SubcallRequest;
use crate::util::extract_json_from_text;

use super::concurrency::run_with_concurrency;

/// Scope-exit guard for the recursion-depth counter. Dropping it decrements,
/// so every exit path — early return, `?`, panic unwind — releases the slot.
struct DepthGuard<'a> {
    depth: &'a AtomicUsize,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SubcallManager {
    client: Arc<dyn ModelClient>,
    max_depth: usize,
    default_concurrency: usize,
    sub_model: String,
    depth: AtomicUsize,
    deferred: Mutex<HashMap<String, JoinHandle<RlmResult<String>>>>,
    handle_counter: AtomicU64,
}

impl SubcallManager {
    pub fn new(client: Arc<dyn ModelClient>, config: &RlmConfig) -> Self {
        Self {
            client,
            max_depth: config.max_recursion_depth,
            default_concurrency: config.max_subcall_concurrency.max(1),
            sub_model: config.sub_model().to_string(),
            depth: AtomicUsize::new(0),
            deferred: Mutex::new(HashMap::new()),
            handle_counter: AtomicU64::new(0),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn default_concurrency(&self) -> usize {
        self.default_concurrency
    }

    /// Number of deferred calls currently registered.
    pub fn pending_deferred(&self) -> usize {
        self.deferred.lock().expect("deferred registry poisoned").len()
    }

    fn try_enter(&self) -> Option<DepthGuard<'_>> {
        let prev = self.depth.fetch_add(1, Ordering::SeqCst);
        if prev >= self.max_depth {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(DepthGuard { depth: &self.depth })
    }

    fn blocked_sentinel(&self) -> String {
        format!(
            "[llm_query blocked: max recursion depth {} reached]",
            self.max_depth
        )
    }

    fn blocked_batch_sentinel(&self) -> String {
        format!("[blocked: max recursion depth {}]", self.max_depth)
    }

    /// Undecorated sub-call: build the constrained prompt and invoke. No depth
    /// gate — callers hold one already.
    async fn dispatch_one(&self, request: &SubcallRequest) -> RlmResult<String> {
        let sub_prompt = prompt::build_subcall_prompt(&request.snippet, &request.question);
        let text = self.client.invoke(&sub_prompt, Some(&self.sub_model)).await?;
        Ok(text.trim().to_string())
    }

    /// Fan requests out through the concurrency limiter. No depth gate.
    async fn dispatch_parallel(
        &self,
        requests: Vec<SubcallRequest>,
        concurrency: usize,
    ) -> RlmResult<Vec<String>> {
        let results = run_with_concurrency(requests, concurrency, |req| async move {
            self.dispatch_one(&req).await
        })
        .await;
        results.into_iter().collect()
    }

    /// The atomic recursive sub-call. Returns the blocked sentinel, without
    /// touching the model, when the ceiling is reached.
    pub async fn llm_query(&self, snippet: &str, question: &str) -> RlmResult<String> {
        let Some(_guard) = self.try_enter() else {
            return Ok(self.blocked_sentinel());
        };
        self.dispatch_one(&SubcallRequest::new(snippet, question)).await
    }

    /// Fire-and-forget sub-call. Mints a handle, starts the call, returns the
    /// handle immediately.
    pub fn llm_query_async(self: &Arc<Self>, snippet: &str, question: &str) -> String {
        let id = format!("q{}", self.handle_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let mgr = Arc::clone(self);
        let snippet = snippet.to_string();
        let question = question.to_string();
        let handle = tokio::spawn(async move { mgr.llm_query(&snippet, &question).await });
        self.deferred
            .lock()
            .expect("deferred registry poisoned")
            .insert(id.clone(), handle);
        id
    }

    /// Await the named deferred calls (all registered ones when `handles` is
    /// empty), removing each from the registry. A handle can be redeemed only
    /// once; unknown handles are silently skipped.
    pub async fn await_deferred(&self, handles: &[String]) -> RlmResult<Vec<(String, String)>> {
        let taken: Vec<(String, JoinHandle<RlmResult<String>>)> = {
            let mut registry = self.deferred.lock().expect("deferred registry poisoned");
            let keys: Vec<String> = if handles.is_empty() {
                let mut all: Vec<String> = registry.keys().cloned().collect();
                all.sort();
                all
            } else {
                handles.to_vec()
            };
            keys.into_iter()
                .filter_map(|k| registry.remove(&k).map(|h| (k, h)))
                .collect()
        };

        let mut out = Vec::with_capacity(taken.len());
        for (id, handle) in taken {
            let result = handle
                .await
                .map_err(|e| RlmError::Other(anyhow::anyhow!("deferred sub-call {id} panicked: {e}")))??;
            out.push((id, result));
        }
        Ok(out)
    }

    /// Parallel fan-out: one depth increment around the whole batch, requests
    /// dispatched through the limiter, results in request order.
    pub async fn llm_query_many_parallel(
        &self,
        requests: Vec<SubcallRequest>,
        concurrency: Option<usize>,
    ) -> RlmResult<Vec<String>> {
        let Some(_guard) = self.try_enter() else {
            return Ok(vec![self.blocked_batch_sentinel(); requests.len()]);
        };
        let cap = concurrency.unwrap_or(self.default_concurrency).max(1);
        self.dispatch_parallel(requests, cap).await
    }

    /// Batched fan-out: one model call carrying all requests. Malformed
    /// responses — not a JSON array of strings, or the wrong length — fall
    /// back to parallel individual calls under the same depth increment.
    pub async fn llm_query_many_batched(
        &self,
        requests: Vec<SubcallRequest>,
    ) -> RlmResult<Vec<String>> {
        let Some(_guard) = self.try_enter() else {
            return Ok(vec![self.blocked_batch_sentinel(); requests.len()]);
        };

        if let Some(answers) = self.try_single_batch(&requests).await? {
            return Ok(answers);
        }
        self.dispatch_parallel(requests, self.default_concurrency).await
    }

    /// One batched call. `Ok(None)` means the response was malformed and the
    /// caller should fall back.
    async fn try_single_batch(&self, requests: &[SubcallRequest]) -> RlmResult<Option<Vec<String>>> {
        let batch_prompt = prompt::build_batched_prompt(requests)?;
        let out = self.client.invoke(&batch_prompt, Some(&self.sub_model)).await?;

        let parsed: Option<Vec<String>> = serde_json::from_str(&out).ok().or_else(|| {
            extract_json_from_text(&out).and_then(|v| serde_json::from_value(v).ok())
        });

        match parsed {
            Some(answers) if answers.len() == requests.len() => Ok(Some(answers)),
            _ => Ok(None),
        }
    }
}
