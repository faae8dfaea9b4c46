//! Search the codebase with ripgrep.

use std::process::Command;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use super::{Tool, ToolOutput, ToolRequest, mentions_any};
use crate::core::text::truncate_chars;
use crate::io::process::{RunOptions, is_not_found, run_command};

const KEYWORDS: &[&str] = &[
    "undefined",
    "import",
    "not found",
    "missing",
    "symbol",
    "reference",
];
const MAX_MESSAGE_CHARS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct GrepCodebaseTool {
    /// ripgrep executable.
    pub program: String,
}

impl Default for GrepCodebaseTool {
    fn default() -> Self {
        Self {
            program: "rg".to_string(),
        }
    }
}

impl Tool for GrepCodebaseTool {
    fn name(&self) -> &'static str {
        "grep_codebase"
    }

    fn description(&self) -> &'static str {
        "Search codebase with ripgrep for patterns, error messages, or symbols"
    }

    fn can_handle(&self, error_info: &str) -> bool {
        mentions_any(error_info, KEYWORDS)
    }

    fn run(&self, request: &ToolRequest) -> Result<ToolOutput> {
        let Some(pattern) = request.pattern.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(ToolOutput::fail("no search pattern provided"));
        };
        info!(pattern, workdir = %request.workdir.display(), "grep_codebase");

        let mut cmd = Command::new(&self.program);
        cmd.arg("--no-heading")
            .arg("--line-number")
            .arg(format!("--max-count={}", request.max_results))
            .arg(pattern)
            .current_dir(&request.workdir);
        if let Some(glob) = &request.glob {
            cmd.arg("--glob").arg(glob);
        }

        let options = RunOptions::new(request.timeout, request.output_limit_bytes);
        let output = match run_command(cmd, &options) {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                return Ok(ToolOutput::fail("ripgrep (rg) not found on PATH"));
            }
            Err(err) => return Err(err).context("run rg"),
        };
        if output.timed_out {
            return Ok(ToolOutput::fail("search timed out"));
        }

        match output.exit_code() {
            Some(0) => {
                let stdout = output.stdout_lossy();
                let match_count = stdout.lines().filter(|l| !l.trim().is_empty()).count();
                let mut message = truncate_chars(&stdout, MAX_MESSAGE_CHARS).to_string();
                if message.len() < stdout.len() {
                    message.push_str("\n...[truncated]...");
                }
                Ok(ToolOutput::ok(message).with_data(json!({ "match_count": match_count })))
            }
            Some(1) => Ok(ToolOutput::ok("no matches found").with_data(json!({ "match_count": 0 }))),
            _ => Ok(ToolOutput::fail(format!(
                "rg error: {}",
                output.stderr_lossy().trim()
            ))),
        }
    }
}
