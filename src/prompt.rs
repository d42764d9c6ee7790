//! Prompt assembly.
//!
//! Pure functions of their inputs — no I/O, no randomness — so a step prompt
//! is reproducible from (task, environment summary, last observation).

use crate::error::RlmResult;
use crate::types::{EnvSummary, SubcallRequest};
use crate::util::truncate;

pub struct StepPromptParams<'a> {
    pub task: &'a str,
    pub summary: &'a EnvSummary,
    pub last_observation: &'a str,
    pub observation_trunc: usize,
    pub completion_phrase: &'a str,
}

/// The main-loop prompt: task, environment summary, the full REPL command
/// reference, the previous observation, and the termination contract.
pub fn build_step_prompt(params: &StepPromptParams<'_>) -> String {
    let index_line = match &params.summary.index_stats {
        Some(stats) => serde_json::to_string(stats).unwrap_or_else(|_| "none".into()),
        None => "none".into(),
    };
    let observation = if params.last_observation.is_empty() {
        "(none yet)".to_string()
    } else {
        truncate(params.last_observation, params.observation_trunc)
    };

    format!(
        r#"You are an RLM operating in an interactive REPL environment.

Key rule:
- Long context + documents are NOT pasted into your prompt tokens by default.
- Use REPL commands to inspect/search/read; use recursive sub-queries over snippets; then finish with FINAL(...).

TASK:
{task}

ENV SUMMARY:
- context_total_length (chars): {context_len}
- indexed_library: {index_line}

REPL API (one command per line inside a ```repl block):
Context:
- LET v = SEARCH "query" [max_matches=20]   -> spans [{{start,end}},...]
- LET v = READ start end                    -> text

Docs (FTS-backed):
- LET v = LIST_DOCS [limit=50 [offset=0]]
- LET v = SEARCH_DOCS "query" [limit=10]    -> hits [{{id,path,chunk_id,start_byte,end_byte,rank,snippet}},...]
- LET v = READ_DOC id start_byte end_byte   -> text

Recursive sub-queries (prefer batching/async):
- LET v = QUERY "question" WITH src                    -> answer text
- LET v = QUERY_ASYNC "question" WITH src              -> handle id
- LET v = AWAIT [h1 h2 ...]                            -> {{handle: answer}} map (default: all pending)
- LET v = QUERY_EACH "question" WITH list [concurrency] -> answers in item order
- LET v = QUERY_BATCHED "question" WITH list            -> answers (single-call batch, falls back)

Text/list helpers:
- LET v = SLICE src start end | LEN src | JOIN src "sep" | CONCAT a b | INDEX src n | GET src
- LET v = CHUNK src BY_LINES n | CHUNK src BY_CHARS n

Output/introspection:
- PRINT v
- STATE
- SHOW_VARS

Execute REPL code in:
```repl
LET n = LEN context
PRINT n
```

LAST OBSERVATION:
{observation}

Finish ONLY with:
- FINAL(your answer)
OR
- FINAL_VAR(variable_name)

After the harness prints your final answer, it will print:
{completion_phrase}"#,
        task = params.task,
        context_len = params.summary.context_len,
        index_line = index_line,
        observation = observation,
        completion_phrase = params.completion_phrase,
    )
}

/// Constrained sub-call prompt: the sub-model answers from the snippet alone.
pub fn build_subcall_prompt(snippet: &str, question: &str) -> String {
    [
        "You are a sub-LLM called by an RLM harness.",
        "Answer the question using ONLY the provided snippet.",
        "Be concise and factual. If missing info, say what's missing.",
        "",
        "QUESTION:",
        question,
        "",
        "SNIPPET:",
        snippet,
    ]
    .join("\n")
}

/// Batched sub-call prompt: all requests in one call, answers expected as a
/// JSON array of strings in item order.
pub fn build_batched_prompt(requests: &[SubcallRequest]) -> RlmResult<String> {
    let payload: Vec<serde_json::Value> = requests
        .iter()
        .enumerate()
        .map(|(i, r)| {
            serde_json::json!({
                "id": i,
                "question": r.question,
                "snippet": r.snippet,
            })
        })
        .collect();

    Ok([
        "You are a sub-LLM in an RLM harness.",
        "Answer each item using ONLY its snippet. If insufficient, say what's missing.",
        "Return ONLY a JSON array of strings in the same order as the items.",
        "",
        "ITEMS_JSON:",
        &serde_json::to_string(&payload)?,
    ]
    .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexStats;

    fn params<'a>(summary: &'a EnvSummary, observation: &'a str) -> StepPromptParams<'a> {
        StepPromptParams {
            task: "What is 2+2?",
            summary,
            last_observation: observation,
            observation_trunc: 8_000,
            completion_phrase: "RLM TASK COMPLETE",
        }
    }

    #[test]
    fn step_prompt_embeds_task_and_summary() {
        let summary = EnvSummary {
            context_len: 1234,
            index_stats: None,
        };
        let prompt = build_step_prompt(&params(&summary, ""));
        assert!(prompt.contains("What is 2+2?"));
        assert!(prompt.contains("context_total_length (chars): 1234"));
        assert!(prompt.contains("indexed_library: none"));
        assert!(prompt.contains("(none yet)"));
        assert!(prompt.contains("RLM TASK COMPLETE"));
    }

    #[test]
    fn step_prompt_documents_the_api_and_markers() {
        let summary = EnvSummary {
            context_len: 0,
            index_stats: None,
        };
        let prompt = build_step_prompt(&params(&summary, ""));
        for needle in [
            "SEARCH", "READ", "LIST_DOCS", "SEARCH_DOCS", "READ_DOC", "QUERY", "QUERY_ASYNC",
            "AWAIT", "QUERY_EACH", "QUERY_BATCHED", "PRINT", "STATE", "SHOW_VARS", "FINAL(",
            "FINAL_VAR(",
        ] {
            assert!(prompt.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn step_prompt_includes_index_stats_when_present() {
        let summary = EnvSummary {
            context_len: 10,
            index_stats: Some(IndexStats { num_docs: 42 }),
        };
        let prompt = build_step_prompt(&params(&summary, ""));
        assert!(prompt.contains(r#"{"num_docs":42}"#));
    }

    #[test]
    fn step_prompt_truncates_the_observation() {
        let summary = EnvSummary {
            context_len: 0,
            index_stats: None,
        };
        let long_obs = "o".repeat(50_000);
        let mut p = params(&summary, &long_obs);
        p.observation_trunc = 100;
        let prompt = build_step_prompt(&p);
        assert!(prompt.contains("truncated, total 50000 chars"));
    }

    #[test]
    fn step_prompt_is_deterministic() {
        let summary = EnvSummary {
            context_len: 7,
            index_stats: None,
        };
        let a = build_step_prompt(&params(&summary, "obs"));
        let b = build_step_prompt(&params(&summary, "obs"));
        assert_eq!(a, b);
    }

    #[test]
    fn subcall_prompt_constrains_to_snippet() {
        let prompt = build_subcall_prompt("the snippet body", "the question");
        assert!(prompt.contains("ONLY the provided snippet"));
        assert!(prompt.contains("QUESTION:\nthe question"));
        assert!(prompt.contains("SNIPPET:\nthe snippet body"));
    }

    #[test]
    fn batched_prompt_serializes_items_in_order() {
        let requests = vec![
            SubcallRequest::new("s0", "q0"),
            SubcallRequest::new("s1", "q1"),
        ];
        let prompt = build_batched_prompt(&requests).unwrap();
        assert!(prompt.contains("JSON array of strings"));
        let idx0 = prompt.find("\"q0\"").unwrap();
        let idx1 = prompt.find("\"q1\"").unwrap();
        assert!(idx0 < idx1);
        assert!(prompt.contains(r#""id":0"#));
    }
}
