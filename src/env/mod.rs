//! The execution environment — variables, primitives, and block execution.
//!
//! One `RlmEnvironment` lives for the whole run. REPL blocks execute against
//! it sequentially, so bindings created by one block are visible to the next.
//! Each block runs under a wall-clock timeout and writes into a capture
//! buffer that becomes the block's observed output. The environment restricts
//! the vocabulary available to model-written code; it is not a security
//! boundary.

pub mod concurrency;
pub mod subcall;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::client::ModelClient;
use crate::config::RlmConfig;
use crate::error::{RlmError, RlmResult};
use crate::index::DocumentIndex;
use crate::script::{ChunkBy, ScriptCommand, ScriptParser};
use crate::types::{EnvSummary, ExecutionResult, Span, SubcallRequest};
use crate::util::truncate;

use subcall::SubcallManager;

/// A binding in the environment
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    /// Single text value
    Text(String),
    /// List of text values (chunks, results)
    List(Vec<String>),
    /// Numeric value
    Number(usize),
    /// Context spans from SEARCH
    Spans(Vec<Span>),
    /// Handle → result mapping from AWAIT
    Map(Vec<(String, String)>),
}

impl Variable {
    pub fn as_text(&self) -> String {
        match self {
            Variable::Text(s) => s.clone(),
            Variable::List(v) => v.join("\n"),
            Variable::Number(n) => n.to_string(),
            Variable::Spans(spans) => spans
                .iter()
                .map(|s| format!("{{start: {}, end: {}}}", s.start, s.end))
                .collect::<Vec<_>>()
                .join("\n"),
            Variable::Map(entries) => entries
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            Variable::Text(s) => vec![s.clone()],
            Variable::List(v) => v.clone(),
            Variable::Number(n) => vec![n.to_string()],
            Variable::Spans(spans) => spans
                .iter()
                .map(|s| format!("{{start: {}, end: {}}}", s.start, s.end))
                .collect(),
            Variable::Map(entries) => entries.iter().map(|(_, v)| v.clone()).collect(),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Variable::Text(_) => "text",
            Variable::List(_) => "list",
            Variable::Number(_) => "number",
            Variable::Spans(_) => "spans",
            Variable::Map(_) => "map",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Variable::Text(s) => json!(s),
            Variable::List(v) => json!(v),
            Variable::Number(n) => json!(n),
            Variable::Spans(spans) => json!(spans),
            Variable::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), json!(v));
                }
                Value::Object(map)
            }
        }
    }

    /// Rendering used when a run terminates with FINAL_VAR: text passes
    /// through untouched, everything else serializes to pretty JSON.
    pub fn render_final(&self) -> String {
        match self {
            Variable::Text(s) => s.clone(),
            other => serde_json::to_string_pretty(&other.to_json()).unwrap_or_else(|_| other.as_text()),
        }
    }
}

pub struct RlmEnvironment {
    index: Option<Arc<dyn DocumentIndex>>,
    subcalls: Arc<SubcallManager>,
    variables: HashMap<String, Variable>,
    printed: Vec<String>,
    repl_timeout: Duration,
    output_trunc: usize,
}

impl RlmEnvironment {
    pub fn new(
        context: String,
        index: Option<Arc<dyn DocumentIndex>>,
        client: Arc<dyn ModelClient>,
        config: &RlmConfig,
    ) -> Self {
        // The context is an ordinary binding so that every command that takes
        // a source variable works on it directly.
        let mut variables = HashMap::new();
        variables.insert("context".to_string(), Variable::Text(context));
        Self {
            index,
            subcalls: Arc::new(SubcallManager::new(client, config)),
            variables,
            printed: Vec::new(),
            repl_timeout: Duration::from_millis(config.repl_timeout_ms),
            output_trunc: config.output_trunc_chars,
        }
    }

    pub fn context(&self) -> &str {
        match self.variables.get("context") {
            Some(Variable::Text(s)) => s,
            _ => "",
        }
    }

    pub fn summary(&self) -> EnvSummary {
        EnvSummary {
            context_len: self.context().len(),
            index_stats: self.index.as_ref().map(|ix| ix.stats()),
        }
    }

    pub fn get_var(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn set_var(&mut self, name: &str, value: Variable) {
        self.variables.insert(name.to_string(), value);
    }

    /// FINAL_VAR rendering of a binding, when it exists.
    pub fn render_binding(&self, name: &str) -> Option<String> {
        self.variables.get(name).map(Variable::render_final)
    }

    pub fn subcalls(&self) -> &Arc<SubcallManager> {
        &self.subcalls
    }

    /// Execute one REPL block: reset the capture buffer, parse, run the
    /// commands in order under the block timeout. Any error — parse failure,
    /// primitive failure, sub-call invocation failure, timeout — fails the
    /// block; captured output up to that point is still returned.
    pub async fn run_repl(&mut self, code: &str) -> ExecutionResult {
        self.printed.clear();
        let timeout = self.repl_timeout;
        let outcome = tokio::time::timeout(timeout, self.execute_block(code)).await;

        let printed = truncate(&self.printed.join("\n"), self.output_trunc);
        match outcome {
            Ok(Ok(())) => ExecutionResult::ok(printed),
            Ok(Err(e)) => {
                let error = truncate(&e.to_string(), self.output_trunc);
                ExecutionResult::failed(printed, error)
            }
            Err(_) => ExecutionResult::failed(
                printed,
                format!("REPL block timed out after {}ms", timeout.as_millis()),
            ),
        }
    }

    async fn execute_block(&mut self, code: &str) -> RlmResult<()> {
        let commands = ScriptParser::parse(code)?;
        for cmd in &commands {
            self.execute_command(cmd).await?;
        }
        Ok(())
    }

    async fn execute_command(&mut self, command: &ScriptCommand) -> RlmResult<()> {
        match command {
            ScriptCommand::Search {
                target,
                query,
                max_matches,
            } => {
                let spans = self.search(query, max_matches.unwrap_or(20));
                let count = spans.len();
                self.variables.insert(target.clone(), Variable::Spans(spans));
                self.printed
                    .push(format!("Found {count} match(es) for \"{query}\""));
            }
            ScriptCommand::Read { target, start, end } => {
                let text = self.read(*start, *end).to_string();
                let len = text.len();
                self.variables.insert(target.clone(), Variable::Text(text));
                self.printed.push(format!("Read [{start}..{end}], {len} chars"));
            }
            ScriptCommand::Slice {
                target,
                source,
                start,
                end,
            } => {
                let text = self.require_text(source)?;
                let slice = slice_clamped(&text, *start, *end).to_string();
                let len = slice.len();
                self.variables.insert(target.clone(), Variable::Text(slice));
                self.printed.push(format!("Sliced [{start}..{end}], {len} chars"));
            }
            ScriptCommand::Len { target, source } => {
                let var = self.require_var(source)?;
                let len = match var {
                    Variable::Text(s) => s.len(),
                    Variable::List(v) => v.len(),
                    Variable::Number(n) => *n,
                    Variable::Spans(spans) => spans.len(),
                    Variable::Map(entries) => entries.len(),
                };
                self.variables.insert(target.clone(), Variable::Number(len));
                self.printed.push(format!("{source} length = {len}"));
            }
            ScriptCommand::Join {
                target,
                source,
                separator,
            } => {
                let list = self.require_list(source)?;
                let sep = separator.replace("\\n", "\n").replace("\\t", "\t");
                let joined = list.join(&sep);
                let len = joined.len();
                self.variables.insert(target.clone(), Variable::Text(joined));
                self.printed.push(format!("Joined {source} into {len} chars"));
            }
            ScriptCommand::Concat {
                target,
                left,
                right,
            } => {
                let l = self.require_text(left)?;
                let r = self.require_text(right)?;
                let combined = format!("{l}{r}");
                let len = combined.len();
                self.variables.insert(target.clone(), Variable::Text(combined));
                self.printed.push(format!("Concatenated into {len} chars"));
            }
            ScriptCommand::Index {
                target,
                source,
                index,
            } => {
                let list = self.require_list(source)?;
                if *index >= list.len() {
                    return Err(RlmError::Other(anyhow::anyhow!(
                        "Index {index} out of bounds for {source} (len={})",
                        list.len()
                    )));
                }
                let item = list[*index].clone();
                self.variables.insert(target.clone(), Variable::Text(item));
                self.printed.push(format!("Got item [{index}] from {source}"));
            }
            ScriptCommand::Get { target, source } => {
                let var = self.require_var(source)?.clone();
                self.variables.insert(target.clone(), var);
            }
            ScriptCommand::Chunk {
                target,
                source,
                by,
                size,
            } => {
                let text = self.require_text(source)?;
                let chunks = match by {
                    ChunkBy::Lines => chunk_by_lines(&text, *size),
                    ChunkBy::Chars => chunk_by_chars(&text, *size),
                };
                let count = chunks.len();
                self.variables.insert(target.clone(), Variable::List(chunks));
                let unit = match by {
                    ChunkBy::Lines => "lines",
                    ChunkBy::Chars => "chars",
                };
                self.printed
                    .push(format!("Chunked into {count} parts by {size} {unit}"));
            }
            ScriptCommand::ListDocs {
                target,
                limit,
                offset,
            } => {
                let docs = match &self.index {
                    Some(ix) => ix.list_docs(*limit, *offset),
                    None => Vec::new(),
                };
                let count = docs.len();
                let items: Vec<String> = docs
                    .iter()
                    .map(|d| serde_json::to_string(d).unwrap_or_default())
                    .collect();
                self.variables.insert(target.clone(), Variable::List(items));
                self.printed.push(format!("Listed {count} doc(s)"));
            }
            ScriptCommand::SearchDocs {
                target,
                query,
                limit,
            } => {
                let hits = match &self.index {
                    Some(ix) => ix.search_docs(query, *limit),
                    None => Vec::new(),
                };
                let count = hits.len();
                let items: Vec<String> = hits
                    .iter()
                    .map(|h| serde_json::to_string(h).unwrap_or_default())
                    .collect();
                self.variables.insert(target.clone(), Variable::List(items));
                self.printed
                    .push(format!("Found {count} doc hit(s) for \"{query}\""));
            }
            ScriptCommand::ReadDoc {
                target,
                id,
                start_byte,
                end_byte,
            } => match &self.index {
                Some(ix) => {
                    let text = ix.read_doc(id, *start_byte, *end_byte).await?;
                    let len = text.len();
                    self.variables.insert(target.clone(), Variable::Text(text));
                    self.printed
                        .push(format!("Read doc {id} [{start_byte}..{end_byte}], {len} chars"));
                }
                None => {
                    self.variables
                        .insert(target.clone(), Variable::Text(String::new()));
                    self.printed.push("No index loaded; empty result".into());
                }
            },
            ScriptCommand::Query {
                target,
                question,
                source,
            } => {
                let snippet = self.require_text(source)?;
                let answer = self.subcalls.llm_query(&snippet, question).await?;
                let len = answer.len();
                self.variables.insert(target.clone(), Variable::Text(answer));
                self.printed.push(format!("[QUERY → {target}]: {len} chars"));
            }
            ScriptCommand::QueryAsync {
                target,
                question,
                source,
            } => {
                let snippet = self.require_text(source)?;
                let handle = self.subcalls.llm_query_async(&snippet, question);
                self.printed
                    .push(format!("[QUERY_ASYNC → {target}]: handle {handle}"));
                self.variables.insert(target.clone(), Variable::Text(handle));
            }
            ScriptCommand::Await { target, handles } => {
                // Each token may be a variable holding a handle, or a raw handle id
                let resolved: Vec<String> = handles
                    .iter()
                    .map(|t| match self.variables.get(t) {
                        Some(Variable::Text(h)) => h.clone(),
                        _ => t.clone(),
                    })
                    .collect();
                let results = self.subcalls.await_deferred(&resolved).await?;
                let count = results.len();
                self.variables.insert(target.clone(), Variable::Map(results));
                self.printed.push(format!("[AWAIT → {target}]: {count} result(s)"));
            }
            ScriptCommand::QueryEach {
                target,
                question,
                source,
                concurrency,
            } => {
                let items = self.require_list(source)?;
                let requests: Vec<SubcallRequest> = items
                    .iter()
                    .map(|item| SubcallRequest::new(item.clone(), question.clone()))
                    .collect();
                let results = self
                    .subcalls
                    .llm_query_many_parallel(requests, *concurrency)
                    .await?;
                let count = results.len();
                self.variables.insert(target.clone(), Variable::List(results));
                self.printed
                    .push(format!("[QUERY_EACH → {target}]: {count} result(s)"));
            }
            ScriptCommand::QueryBatched {
                target,
                question,
                source,
            } => {
                let items = self.require_list(source)?;
                let requests: Vec<SubcallRequest> = items
                    .iter()
                    .map(|item| SubcallRequest::new(item.clone(), question.clone()))
                    .collect();
                let results = self.subcalls.llm_query_many_batched(requests).await?;
                let count = results.len();
                self.variables.insert(target.clone(), Variable::List(results));
                self.printed
                    .push(format!("[QUERY_BATCHED → {target}]: {count} result(s)"));
            }
            ScriptCommand::Print { var_name } => {
                let var = self.require_var(var_name)?;
                let output = render_for_print(var);
                self.printed.push(output);
            }
            ScriptCommand::State => {
                self.printed.push(format!(
                    "context_total_length: {}\nindex_loaded: {}\nmax_recursion_depth: {}\nmax_subcall_concurrency: {}",
                    self.context().len(),
                    self.index.is_some(),
                    self.subcalls.max_depth(),
                    self.subcalls.default_concurrency(),
                ));
            }
            ScriptCommand::ShowVars => {
                let mut vars: Vec<String> = self
                    .variables
                    .iter()
                    .map(|(k, v)| format!("  {k}: {}", v.type_name()))
                    .collect();
                vars.sort();
                let output = if vars.is_empty() {
                    "No variables.".to_string()
                } else {
                    format!("Variables:\n{}", vars.join("\n"))
                };
                self.printed.push(output);
            }
        }
        Ok(())
    }

    /// Sequential literal substring scan from the start of the context.
    /// Non-overlapping: the scan resumes at each match's end (one past the
    /// start for an empty query), so adjacent/overlapping hits are skipped.
    fn search(&self, query: &str, max_matches: usize) -> Vec<Span> {
        let context = self.context();
        let mut matches = Vec::new();
        let mut idx = 0;
        while idx < context.len() && matches.len() < max_matches {
            let Some(rel) = context[idx..].find(query) else {
                break;
            };
            let start = idx + rel;
            let end = start + query.len();
            matches.push(Span { start, end });
            let mut next = if query.is_empty() { start + 1 } else { end };
            while next < context.len() && !context.is_char_boundary(next) {
                next += 1;
            }
            idx = next;
        }
        matches
    }

    /// Substring of the context for the span, clamped to `[0, len]` and to
    /// char boundaries.
    fn read(&self, start: usize, end: usize) -> &str {
        slice_clamped(self.context(), start, end)
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    fn require_var(&self, name: &str) -> RlmResult<&Variable> {
        self.variables.get(name).ok_or_else(|| {
            let mut available: Vec<String> = self.variables.keys().cloned().collect();
            available.sort();
            RlmError::UnknownVariable {
                name: name.to_string(),
                available,
            }
        })
    }

    fn require_text(&self, name: &str) -> RlmResult<String> {
        Ok(self.require_var(name)?.as_text())
    }

    fn require_list(&self, name: &str) -> RlmResult<Vec<String>> {
        Ok(self.require_var(name)?.as_list())
    }
}

fn slice_clamped(text: &str, start: usize, end: usize) -> &str {
    let len = text.len();
    let mut s = start.min(len);
    while !text.is_char_boundary(s) {
        s -= 1;
    }
    let mut e = end.min(len);
    while !text.is_char_boundary(e) {
        e += 1;
    }
    if e <= s {
        return "";
    }
    &text[s..e]
}

fn chunk_by_lines(text: &str, lines_per_chunk: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    lines
        .chunks(lines_per_chunk.max(1))
        .map(|chunk| chunk.join("\n"))
        .collect()
}

fn chunk_by_chars(text: &str, chars_per_chunk: usize) -> Vec<String> {
    let size = chars_per_chunk.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + size).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        // Prefer to break at a newline boundary
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }
    chunks
}

fn render_for_print(var: &Variable) -> String {
    match var {
        Variable::Text(s) => {
            if s.chars().count() > 500 {
                let prefix: String = s.chars().take(500).collect();
                format!("{prefix} ... [{} chars total]", s.len())
            } else {
                s.clone()
            }
        }
        Variable::List(v) => {
            let previews: Vec<String> = v
                .iter()
                .map(|s| {
                    if s.chars().count() > 100 {
                        let prefix: String = s.chars().take(100).collect();
                        format!("{prefix}...")
                    } else {
                        s.clone()
                    }
                })
                .collect();
            format!("List[{}]: {previews:?}", v.len())
        }
        Variable::Number(n) => n.to_string(),
        Variable::Spans(spans) => {
            let shown: Vec<String> = spans
                .iter()
                .take(20)
                .map(|s| format!("{{start: {}, end: {}}}", s.start, s.end))
                .collect();
            let suffix = if spans.len() > 20 {
                format!(" … [{} spans total]", spans.len())
            } else {
                String::new()
            };
            format!("Spans[{}]: [{}]{suffix}", spans.len(), shown.join(", "))
        }
        Variable::Map(entries) => entries
            .iter()
            .map(|(k, v)| {
                if v.chars().count() > 100 {
                    let prefix: String = v.chars().take(100).collect();
                    format!("{k}: {prefix}...")
                } else {
                    format!("{k}: {v}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
