//! Visual QA through the agent and its Playwright MCP server.
//!
//! The agent is asked to open a URL, check each assertion and finish with a
//! JSON object carrying `all_passed`. That object decides the outcome.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use super::{Tool, ToolOutput, ToolRequest, mentions_any};
use crate::core::spec::DEFAULT_MODEL;
use crate::io::agent::{exec_command, message_text};
use crate::io::process::{RunOptions, is_not_found, run_command};

const KEYWORDS: &[&str] = &[
    "ui",
    "page",
    "render",
    "visual",
    "browser",
    "playwright",
    "frontend",
];
const UNSTRUCTURED_TAIL_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct PlaywrightQaTool {
    /// Agent executable that has Playwright available.
    pub agent_command: String,
}

impl PlaywrightQaTool {
    pub fn new(agent_command: impl Into<String>) -> Self {
        Self {
            agent_command: agent_command.into(),
        }
    }
}

impl Tool for PlaywrightQaTool {
    fn name(&self) -> &'static str {
        "playwright_qa"
    }

    fn description(&self) -> &'static str {
        "Run visual QA via the agent and Playwright to verify a URL meets assertions"
    }

    fn can_handle(&self, error_info: &str) -> bool {
        mentions_any(error_info, KEYWORDS)
    }

    fn run(&self, request: &ToolRequest) -> Result<ToolOutput> {
        let Some(url) = request.url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(ToolOutput::fail("no URL provided for Playwright QA"));
        };
        if request.assertions.is_empty() {
            return Ok(ToolOutput::fail("no assertions provided for Playwright QA"));
        }
        info!(url, assertions = request.assertions.len(), "playwright_qa");

        let model = request.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let cmd = exec_command(&self.agent_command, &request.workdir, model);
        let options = RunOptions::new(request.timeout, request.output_limit_bytes)
            .with_stdin(qa_prompt(url, &request.assertions));

        let output = match run_command(cmd, &options) {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                return Ok(ToolOutput::fail(format!(
                    "{} not found on PATH",
                    self.agent_command
                )));
            }
            Err(err) => return Err(err).context("run playwright QA"),
        };
        if output.timed_out {
            return Ok(ToolOutput::fail(format!(
                "Playwright QA timed out after {}s",
                request.timeout.as_secs()
            )));
        }

        let stdout = output.stdout_lossy();
        if let Some(result) = extract_result(&stdout) {
            let all_passed = result
                .get("all_passed")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let verdict = if all_passed { "PASSED" } else { "FAILED" };
            let message = format!("Playwright QA {verdict}:\n{}", summarize(&result));
            return Ok(ToolOutput {
                success: all_passed,
                message,
                data: Some(result),
            });
        }

        let skip = stdout.chars().count().saturating_sub(UNSTRUCTURED_TAIL_CHARS);
        let tail: String = stdout.chars().skip(skip).collect();
        Ok(ToolOutput {
            success: output.success(),
            message: format!("Playwright QA completed (unstructured):\n{tail}"),
            data: None,
        })
    }
}

fn qa_prompt(url: &str, assertions: &[String]) -> String {
    let listed: Vec<String> = assertions.iter().map(|a| format!("  - {a}")).collect();
    format!(
        "Use Playwright (via the MCP server) to navigate to {url} and verify the following \
         assertions. For each assertion, report PASS or FAIL with a brief explanation of what \
         you observed.\n\nAssertions:\n{}\n\nAfter checking all assertions, output a single JSON \
         object with:\n  {{\"all_passed\": true/false, \"results\": [{{\"assertion\": \"...\", \
         \"status\": \"PASS\"/\"FAIL\", \"observation\": \"...\"}}]}}",
        listed.join("\n")
    )
}

fn summarize(result: &Value) -> String {
    let Some(results) = result.get("results").and_then(Value::as_array) else {
        return String::new();
    };
    let field = |r: &Value, key: &str, fallback: &'static str| {
        r.get(key)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    };
    results
        .iter()
        .map(|r| {
            format!(
                "  [{}] {}: {}",
                field(r, "status", "?"),
                field(r, "assertion", "?"),
                field(r, "observation", "")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Latest QA verdict in the agent's output stream, newest line first.
fn extract_result(stdout: &str) -> Option<Value> {
    for line in stdout.lines().rev().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(event) => {
                if let Some(text) = message_text(&event) {
                    return find_verdict(&text);
                }
            }
            Err(_) => {
                if let Some(found) = find_verdict(line) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// First balanced `{...}` in `text` that parses and has an `all_passed` key.
fn find_verdict(text: &str) -> Option<Value> {
    let starts = text.match_indices('{').map(|(idx, _)| idx);
    for start in starts {
        let mut depth = 0usize;
        for (offset, ch) in text[start..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=start + offset];
                        if let Ok(value) = serde_json::from_str::<Value>(candidate)
                            && value.get("all_passed").is_some()
                        {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    None
}
