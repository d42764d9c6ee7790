//! The control loop.
//!
//! Drives the step machine: build prompt → invoke model → parse → terminate,
//! or execute the extracted REPL blocks and fold their results into the next
//! observation. A failed model invocation aborts the run; everything that
//! happens inside a block is caught and reported as that block's failure.

use std::sync::Arc;

use uuid::Uuid;

use crate::client::ModelClient;
use crate::config::RlmConfig;
use crate::env::RlmEnvironment;
use crate::error::RlmResult;
use crate::parser::{extract_final, extract_repl_blocks};
use crate::prompt::{build_step_prompt, StepPromptParams};
use crate::runlog::RunLog;
use crate::types::FinalAnswer;

const NO_ACTION_OBSERVATION: &str = "No ```repl``` blocks and no FINAL/FINAL_VAR found. \
You must either run REPL code or finish with FINAL(...).";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A terminal marker produced an answer.
    Final { answer: String, steps: usize },
    /// The step budget ran out before any terminal marker.
    BudgetExhausted { steps: usize },
}

impl RunOutcome {
    pub fn answer(&self) -> Option<&str> {
        match self {
            RunOutcome::Final { answer, .. } => Some(answer),
            RunOutcome::BudgetExhausted { .. } => None,
        }
    }
}

pub struct RlmController {
    client: Arc<dyn ModelClient>,
    config: RlmConfig,
    log: RunLog,
}

impl RlmController {
    pub fn new(client: Arc<dyn ModelClient>, config: RlmConfig, log: RunLog) -> Self {
        Self {
            client,
            config,
            log,
        }
    }

    /// Run the loop to completion. Progress and the final answer are emitted
    /// through the run log; the outcome is also returned so callers don't
    /// have to scrape text.
    pub async fn run(&self, task: &str, env: &mut RlmEnvironment) -> RlmResult<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let max_steps = self.config.max_steps;
        let summary = env.summary();

        self.log.info("controller", format!("Starting run {run_id}"));
        self.log.info("controller", format!("Steps budget: {max_steps}"));
        self.log
            .info("controller", format!("Context length: {} chars", summary.context_len));
        if let Some(stats) = &summary.index_stats {
            self.log.info(
                "controller",
                format!("Index: {}", serde_json::to_string(stats)?),
            );
        }

        let mut last_observation = String::new();

        for step in 1..=max_steps {
            self.log
                .info("controller", format!("=== Step {step}/{max_steps} ==="));

            let prompt = build_step_prompt(&StepPromptParams {
                task,
                summary: &summary,
                last_observation: &last_observation,
                observation_trunc: self.config.output_trunc_chars,
                completion_phrase: &self.config.completion_phrase,
            });

            // Main-loop invocation failures are fatal for the run
            let model_out = self.client.invoke(&prompt, None).await?;

            if let Some(fin) = extract_final(&model_out) {
                let answer = match fin {
                    FinalAnswer::Text(value) => value,
                    FinalAnswer::Var(name) => env
                        .render_binding(&name)
                        .unwrap_or_else(|| format!("(unset variable '{name}')")),
                };

                self.log.info("controller", "FINAL detected.");
                self.log.info("controller", answer.trim());
                self.log.info("controller", &self.config.completion_phrase);
                return Ok(RunOutcome::Final {
                    answer: answer.trim().to_string(),
                    steps: step,
                });
            }

            let blocks = extract_repl_blocks(&model_out);
            if blocks.is_empty() {
                last_observation = NO_ACTION_OBSERVATION.to_string();
                self.log.info("controller", NO_ACTION_OBSERVATION);
                continue;
            }

            let mut observations = Vec::with_capacity(blocks.len());
            for (i, code) in blocks.iter().enumerate() {
                self.log.info(
                    "repl",
                    format!(
                        "Running REPL block {}/{} (chars={})",
                        i + 1,
                        blocks.len(),
                        code.len()
                    ),
                );
                let res = env.run_repl(code).await;

                let stdout = if res.printed.trim().is_empty() {
                    "(empty)"
                } else {
                    res.printed.as_str()
                };
                self.log.info("repl", format!("stdout:\n{stdout}"));
                if !res.succeeded {
                    self.log.warn(
                        "repl",
                        format!("error:\n{}", res.error.as_deref().unwrap_or("(unknown error)")),
                    );
                }

                observations.push(if res.succeeded {
                    format!("REPL block {} ok.\nstdout:\n{}", i + 1, res.printed)
                        .trim()
                        .to_string()
                } else {
                    format!(
                        "REPL block {} failed.\nstdout:\n{}\nerror:\n{}",
                        i + 1,
                        res.printed,
                        res.error.as_deref().unwrap_or_default()
                    )
                    .trim()
                    .to_string()
                });
            }

            // Replaced wholesale each step; never appended
            last_observation = observations.join("\n\n---\n\n");
        }

        self.log
            .info("controller", "Max steps reached without FINAL. Exiting.");
        self.log.info("controller", &self.config.completion_phrase);
        Ok(RunOutcome::BudgetExhausted { steps: max_steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RlmError;
    use crate::runlog::MemorySink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockClient {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for MockClient {
        async fn invoke(&self, prompt: &str, _model: Option<&str>) -> RlmResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| RlmError::ModelInvocation("no scripted response".into()))
        }
    }

    fn harness(
        responses: Vec<&str>,
        context: &str,
        config: RlmConfig,
    ) -> (RlmController, RlmEnvironment, Arc<MockClient>, Arc<MemorySink>) {
        let client = MockClient::new(responses);
        let sink = Arc::new(MemorySink::new());
        let mut log = RunLog::new();
        log.add_sink(sink.clone());
        let env = RlmEnvironment::new(context.into(), None, client.clone(), &config);
        let controller = RlmController::new(client.clone(), config, log);
        (controller, env, client, sink)
    }

    #[tokio::test]
    async fn final_text_terminates() {
        let (controller, mut env, _, sink) =
            harness(vec!["FINAL(the answer)"], "ctx", RlmConfig::default());
        let outcome = controller.run("task", &mut env).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Final {
                answer: "the answer".into(),
                steps: 1
            }
        );
        assert!(sink.rendered().contains("RLM TASK COMPLETE"));
    }

    #[tokio::test]
    async fn final_var_resolves_binding() {
        let responses = vec![
            "```repl\nLET answer = READ 0 4\n```",
            "FINAL_VAR(answer)",
        ];
        let (controller, mut env, _, _) = harness(responses, "2+2=4 etc", RlmConfig::default());
        let outcome = controller.run("task", &mut env).await.unwrap();
        assert_eq!(outcome.answer(), Some("2+2="));
    }

    #[tokio::test]
    async fn final_var_unset_binding_is_reported() {
        let (controller, mut env, _, _) =
            harness(vec!["FINAL_VAR(ghost)"], "ctx", RlmConfig::default());
        let outcome = controller.run("task", &mut env).await.unwrap();
        assert_eq!(outcome.answer(), Some("(unset variable 'ghost')"));
    }

    #[tokio::test]
    async fn no_action_gets_instructional_observation() {
        let responses = vec!["just some prose, no blocks", "FINAL(done)"];
        let (controller, mut env, client, _) = harness(responses, "ctx", RlmConfig::default());
        let outcome = controller.run("task", &mut env).await.unwrap();
        assert_eq!(outcome.answer(), Some("done"));

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("You must either run REPL code or finish with FINAL(...)"));
    }

    #[tokio::test]
    async fn budget_exhaustion_reports_and_emits_completion_phrase() {
        let config = RlmConfig {
            max_steps: 1,
            ..RlmConfig::default()
        };
        let (controller, mut env, _, sink) = harness(vec!["no marker here"], "ctx", config);
        let outcome = controller.run("task", &mut env).await.unwrap();
        assert_eq!(outcome, RunOutcome::BudgetExhausted { steps: 1 });
        assert!(outcome.answer().is_none());
        let rendered = sink.rendered();
        assert!(rendered.contains("Max steps reached without FINAL"));
        assert!(rendered.contains("RLM TASK COMPLETE"));
    }

    #[tokio::test]
    async fn model_failure_aborts_the_run() {
        let (controller, mut env, _, _) = harness(vec![], "ctx", RlmConfig::default());
        let err = controller.run("task", &mut env).await.unwrap_err();
        assert!(matches!(err, RlmError::ModelInvocation(_)));
    }

    #[tokio::test]
    async fn block_results_fold_into_next_observation() {
        let responses = vec![
            "```repl\nLET n = LEN context\nPRINT n\n```",
            "FINAL(ok)",
        ];
        let (controller, mut env, client, _) = harness(responses, "12345", RlmConfig::default());
        controller.run("task", &mut env).await.unwrap();

        let prompts = client.prompts();
        assert!(prompts[1].contains("REPL block 1 ok."));
        assert!(prompts[1].contains("context length = 5"));
    }

    #[tokio::test]
    async fn failed_block_is_reported_not_fatal() {
        let responses = vec![
            "```repl\nPRINT missing_var\n```",
            "FINAL(recovered)",
        ];
        let (controller, mut env, client, _) = harness(responses, "ctx", RlmConfig::default());
        let outcome = controller.run("task", &mut env).await.unwrap();
        assert_eq!(outcome.answer(), Some("recovered"));
        assert!(client.prompts()[1].contains("REPL block 1 failed."));
    }

    #[tokio::test]
    async fn blocks_share_state_within_a_step() {
        let responses = vec![
            "```repl\nLET x = READ 0 5\n```\n```repl\nPRINT x\n```",
            "FINAL(ok)",
        ];
        let (controller, mut env, client, _) = harness(responses, "hello world", RlmConfig::default());
        controller.run("task", &mut env).await.unwrap();
        let prompts = client.prompts();
        assert!(prompts[1].contains("REPL block 2 ok."));
        assert!(prompts[1].contains("hello"));
    }

    #[tokio::test]
    async fn observation_is_replaced_not_appended() {
        let responses = vec![
            "```repl\nLET a = READ 0 3\nPRINT a\n```",
            "```repl\nLET b = READ 4 7\nPRINT b\n```",
            "FINAL(done)",
        ];
        let (controller, mut env, client, _) = harness(responses, "one two", RlmConfig::default());
        controller.run("task", &mut env).await.unwrap();

        let prompts = client.prompts();
        // Step 3's prompt carries step 2's observation only
        assert!(prompts[2].contains("two"));
        let obs_section = prompts[2].split("LAST OBSERVATION:").nth(1).unwrap();
        assert!(!obs_section.contains("Read [0..3]"));
    }
}
