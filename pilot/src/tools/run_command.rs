//! Run a shell command (tests, builds, lint).

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use super::{Tool, ToolOutput, ToolRequest, mentions_any};
use crate::core::text::truncate_middle;
use crate::io::process::{RunOptions, run_command, shell_command};

pub const MAX_MESSAGE_CHARS: usize = 10_000;

const KEYWORDS: &[&str] = &["test", "build", "lint", "compile", "bazel", "npm", "make"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RunCommandTool;

impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command and return its output and exit code"
    }

    fn can_handle(&self, error_info: &str) -> bool {
        mentions_any(error_info, KEYWORDS)
    }

    fn run(&self, request: &ToolRequest) -> Result<ToolOutput> {
        let Some(command) = request.command.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(ToolOutput::fail("no command provided"));
        };
        info!(command, workdir = %request.workdir.display(), "run_command");

        let options = RunOptions::new(request.timeout, request.output_limit_bytes);
        let output = run_command(shell_command(command, &request.workdir), &options)
            .with_context(|| format!("run `{command}`"))?;
        if output.timed_out {
            return Ok(ToolOutput::fail(format!(
                "command timed out after {}s",
                request.timeout.as_secs()
            )));
        }

        let text = output.combined();
        let message = if text.trim().is_empty() {
            "(no output)".to_string()
        } else {
            truncate_middle(&text, MAX_MESSAGE_CHARS)
        };
        let success = output.exit_code() == Some(request.expect_exit_code);
        Ok(ToolOutput {
            success,
            message,
            data: Some(json!({ "exit_code": output.exit_code() })),
        })
    }
}
