//! Agent abstraction for step execution.
//!
//! The [`Agent`] trait decouples the engine from the actual agent backend
//! (currently `codex exec`). Tests use scripted agents that return
//! predetermined outcomes without spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::text::last_non_empty_line;
use crate::core::types::AgentOutcome;
use crate::io::process::{CommandOutput, RunOptions, is_not_found, run_command};

const CONTINUATION_HEADER: &str = "CONTINUATION FROM PRIOR SESSION:";

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    pub model: String,
    /// Context carried over from earlier sessions; empty for a fresh start.
    pub continuation: String,
    pub timeout: Duration,
    /// Tee raw agent stdout to this file while it runs.
    pub stream_path: Option<PathBuf>,
}

impl AgentRequest {
    /// Prompt text actually sent to the agent.
    pub fn full_prompt(&self) -> String {
        if self.continuation.is_empty() {
            self.prompt.clone()
        } else {
            format!(
                "{CONTINUATION_HEADER}\n{}\n\nCURRENT TASK:\n{}",
                self.continuation, self.prompt
            )
        }
    }
}

/// What one invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    pub outcome: AgentOutcome,
    /// Agent-side session id, when reported.
    pub session_id: Option<String>,
    /// Text the agent emitted, one entry per message line.
    pub output_lines: Vec<String>,
    /// Characters streamed by the agent (context usage input).
    pub streamed_chars: u64,
}

impl AgentRun {
    pub fn success(output_lines: Vec<String>) -> Self {
        let streamed_chars = output_lines.iter().map(|l| l.chars().count() as u64).sum();
        Self {
            outcome: AgentOutcome::Success,
            session_id: None,
            output_lines,
            streamed_chars,
        }
    }

    pub fn failure(outcome: AgentOutcome, output_lines: Vec<String>) -> Self {
        Self {
            outcome,
            ..Self::success(output_lines)
        }
    }

    /// Last non-empty output line, or empty.
    pub fn summary(&self) -> String {
        last_non_empty_line(&self.output_lines)
            .unwrap_or_default()
            .to_string()
    }
}

/// Abstraction over agent execution backends.
pub trait Agent {
    /// Run the agent once. `Err` means the invocation could not be carried out
    /// at all; the engine treats it like any other failed outcome.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun>;
}

/// Agent that spawns `codex exec --json`.
#[derive(Debug, Clone)]
pub struct CodexAgent {
    pub command: String,
    pub output_limit_bytes: usize,
}

impl CodexAgent {
    pub fn new(command: impl Into<String>, output_limit_bytes: usize) -> Self {
        Self {
            command: command.into(),
            output_limit_bytes,
        }
    }

    fn build_command(&self, request: &AgentRequest) -> Command {
        exec_command(&self.command, &request.workdir, &request.model)
    }
}

/// `<program> exec --json` in `workdir`, reading the prompt from stdin.
pub fn exec_command(program: &str, workdir: &Path, model: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg("exec")
        .arg("--json")
        .arg("--cd")
        .arg(workdir)
        .arg("-m")
        .arg(model)
        .arg("-s")
        .arg("workspace-write")
        .arg("-")
        .current_dir(workdir);
    cmd
}

impl Agent for CodexAgent {
    #[instrument(skip_all, fields(model = %request.model, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        info!(workdir = %request.workdir.display(), "starting codex exec");
        let mut options = RunOptions::new(request.timeout, self.output_limit_bytes)
            .with_stdin(request.full_prompt());
        options.stream_path = request.stream_path.clone();

        let output = match run_command(self.build_command(request), &options) {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                warn!(command = %self.command, "agent executable not found");
                return Ok(AgentRun::failure(
                    AgentOutcome::NotFound,
                    vec![format!("agent executable not found: {}", self.command)],
                ));
            }
            Err(err) => return Err(err).context("run codex exec"),
        };

        let run = classify(&output, request.timeout);
        match run.outcome {
            AgentOutcome::Success => debug!(lines = run.output_lines.len(), "codex exec completed"),
            AgentOutcome::TimedOut { after_secs } => warn!(after_secs, "codex exec timed out"),
            AgentOutcome::Failed { exit_code } => warn!(exit_code = ?exit_code, "codex exec failed"),
            AgentOutcome::NotFound => warn!("agent executable not found"),
        }
        Ok(run)
    }
}

fn classify(output: &CommandOutput, timeout: Duration) -> AgentRun {
    let stdout = output.stdout_lossy();
    let parsed = parse_jsonl(&stdout);
    let mut lines = parsed.lines;
    let outcome = if output.timed_out {
        AgentOutcome::TimedOut {
            after_secs: timeout.as_secs(),
        }
    } else if output.status.success() {
        AgentOutcome::Success
    } else {
        AgentOutcome::Failed {
            exit_code: output.exit_code(),
        }
    };
    if !outcome.succeeded() {
        let stderr = output.stderr_lossy();
        let stderr_lines: Vec<&str> = stderr.lines().collect();
        if let Some(tail) = last_non_empty_line(&stderr_lines) {
            lines.push(tail.to_string());
        }
    }
    AgentRun {
        outcome,
        session_id: parsed.session_id,
        output_lines: lines,
        streamed_chars: stdout.chars().count() as u64,
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedStream {
    lines: Vec<String>,
    session_id: Option<String>,
}

/// Extract assistant text and the session id from a `--json` event stream.
///
/// Lines that are not JSON are kept verbatim.
fn parse_jsonl(stdout: &str) -> ParsedStream {
    let mut parsed = ParsedStream::default();
    for raw in stdout.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            parsed.lines.push(line.to_string());
            continue;
        };
        if parsed.session_id.is_none()
            && let Some(id) = session_id_of(&event)
        {
            parsed.session_id = Some(id.to_string());
        }
        if let Some(text) = message_text(&event) {
            parsed
                .lines
                .extend(text.lines().map(str::to_string).filter(|l| !l.trim().is_empty()));
        }
    }
    parsed
}

fn session_id_of(event: &Value) -> Option<&str> {
    event
        .get("session_id")
        .or_else(|| event.get("thread_id"))
        .and_then(Value::as_str)
}

/// Assistant text carried by one stream event, if any.
pub(crate) fn message_text(event: &Value) -> Option<String> {
    match event.get("type").and_then(Value::as_str)? {
        "item.completed" => {
            let item = event.get("item")?;
            let kind = item.get("type").or_else(|| item.get("item_type"));
            if kind.and_then(Value::as_str) != Some("agent_message") {
                return None;
            }
            item.get("text").and_then(Value::as_str).map(str::to_string)
        }
        "message" => {
            if event.get("role").and_then(Value::as_str) != Some("assistant") {
                return None;
            }
            match event.get("content")? {
                Value::String(text) => Some(text.clone()),
                Value::Array(parts) => {
                    let texts: Vec<&str> = parts
                        .iter()
                        .filter_map(|part| part.get("text").and_then(Value::as_str))
                        .collect();
                    (!texts.is_empty()).then(|| texts.join("\n"))
                }
                _ => None,
            }
        }
        _ => None,
    }
}
