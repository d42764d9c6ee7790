//! CLI-backed model client.
//!
//! Shells out to a configurable command, feeds the prompt on stdin, and reads
//! the response from stdout. The argument template carries `{model}` and
//! `{format}` placeholders so one config line covers most chat CLIs.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{OutputFormat, RlmConfig};
use crate::error::{RlmError, RlmResult};
use crate::runlog::RunLog;
use crate::util::{apply_template, extract_json_from_text, parse_shell_args, redact_cmd_for_log};

use super::ModelClient;

pub struct CliModelClient {
    cmd: String,
    args_template: String,
    model: String,
    output: OutputFormat,
    timeout: Duration,
    log: RunLog,
}

impl CliModelClient {
    pub fn new(config: &RlmConfig, log: RunLog) -> Self {
        Self {
            cmd: config.llm_cmd.clone(),
            args_template: config.llm_args_template.clone(),
            model: config.model.clone(),
            output: config.llm_output,
            timeout: Duration::from_millis(config.cli_timeout_ms),
            log,
        }
    }

    fn build_command(&self, model: &str) -> Vec<String> {
        let format = match self.output {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        };
        let rendered = apply_template(&self.args_template, &[("model", model), ("format", format)]);
        let mut full = vec![self.cmd.clone()];
        full.extend(parse_shell_args(&rendered));
        full
    }

    /// Pull the response text out of a JSON envelope, trying the field names
    /// the common CLIs use.
    fn unwrap_json_output(out: &str) -> Option<String> {
        let parsed = serde_json::from_str::<serde_json::Value>(out)
            .ok()
            .or_else(|| extract_json_from_text(out))?;
        let text = parsed
            .get("output")
            .or_else(|| parsed.get("text"))
            .or_else(|| parsed.get("message"))
            .or_else(|| {
                parsed
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("message"))
                    .and_then(|m| m.get("content"))
            })
            .or_else(|| {
                parsed
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("text"))
            })?;
        text.as_str().map(|s| s.trim().to_string())
    }
}

#[async_trait]
impl ModelClient for CliModelClient {
    async fn invoke(&self, prompt: &str, model_override: Option<&str>) -> RlmResult<String> {
        let model = model_override.unwrap_or(&self.model);
        let full_cmd = self.build_command(model);

        self.log
            .info("llm", format!("LLM call: {}", redact_cmd_for_log(&full_cmd).join(" ")));
        self.log
            .info("llm", format!("Prompt size: {} chars", prompt.chars().count()));

        let mut child = Command::new(&full_cmd[0])
            .args(&full_cmd[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RlmError::ModelInvocation(format!("spawn {}: {e}", full_cmd[0])))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            // Closing stdin signals end of prompt
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            // kill_on_drop reaps the child when the future is dropped
            Err(_) => {
                return Err(RlmError::ModelTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            self.log.warn("llm", format!("stderr:\n{}", stderr.trim()));
        }
        if !output.status.success() {
            return Err(RlmError::ModelInvocation(format!(
                "LLM CLI exited with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let out = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if self.output == OutputFormat::Json {
            if let Some(text) = Self::unwrap_json_output(&out) {
                return Ok(text);
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with(template: &str, output: OutputFormat) -> CliModelClient {
        let config = RlmConfig {
            llm_cmd: "llm".into(),
            llm_args_template: template.into(),
            model: "devstral".into(),
            llm_output: output,
            ..RlmConfig::default()
        };
        CliModelClient::new(&config, RunLog::new())
    }

    #[test]
    fn builds_command_from_template() {
        let client = client_with("chat --model {model} --stdin --output {format}", OutputFormat::Text);
        assert_eq!(
            client.build_command("devstral"),
            vec!["llm", "chat", "--model", "devstral", "--stdin", "--output", "text"]
        );
    }

    #[test]
    fn model_override_reaches_command() {
        let client = client_with("run {model}", OutputFormat::Json);
        assert_eq!(client.build_command("small"), vec!["llm", "run", "small"]);
    }

    #[test]
    fn unwraps_plain_json_fields() {
        assert_eq!(
            CliModelClient::unwrap_json_output(r#"{"output": "hi"}"#).as_deref(),
            Some("hi")
        );
        assert_eq!(
            CliModelClient::unwrap_json_output(r#"{"text": " padded "}"#).as_deref(),
            Some("padded")
        );
        assert_eq!(
            CliModelClient::unwrap_json_output(r#"{"choices": [{"message": {"content": "c"}}]}"#).as_deref(),
            Some("c")
        );
        assert_eq!(
            CliModelClient::unwrap_json_output(r#"{"choices": [{"text": "t"}]}"#).as_deref(),
            Some("t")
        );
    }

    #[test]
    fn unwraps_json_embedded_in_noise() {
        let out = "log line\n{\"output\": \"answer\"}\n";
        assert_eq!(CliModelClient::unwrap_json_output(out).as_deref(), Some("answer"));
    }

    #[test]
    fn unwrap_returns_none_for_unknown_shapes() {
        assert!(CliModelClient::unwrap_json_output("not json").is_none());
        assert!(CliModelClient::unwrap_json_output(r#"{"other": 1}"#).is_none());
    }

    #[tokio::test]
    async fn invoke_runs_a_real_process() {
        // `cat` echoes the prompt back; exercises spawn/stdin/stdout plumbing.
        let config = RlmConfig {
            llm_cmd: "cat".into(),
            llm_args_template: "".into(),
            ..RlmConfig::default()
        };
        let client = CliModelClient::new(&config, RunLog::new());
        let out = client.invoke("echo this back", None).await.unwrap();
        assert_eq!(out, "echo this back");
    }

    #[tokio::test]
    async fn invoke_fails_on_nonzero_exit() {
        let config = RlmConfig {
            llm_cmd: "false".into(),
            llm_args_template: "".into(),
            ..RlmConfig::default()
        };
        let client = CliModelClient::new(&config, RunLog::new());
        let err = client.invoke("prompt", None).await.unwrap_err();
        assert!(matches!(err, RlmError::ModelInvocation(_)));
    }

    #[tokio::test]
    async fn invoke_times_out() {
        let config = RlmConfig {
            llm_cmd: "sleep".into(),
            llm_args_template: "5".into(),
            cli_timeout_ms: 50,
            ..RlmConfig::default()
        };
        let client = CliModelClient::new(&config, RunLog::new());
        let err = client.invoke("prompt", None).await.unwrap_err();
        assert!(matches!(err, RlmError::ModelTimeout { .. }));
    }
}
