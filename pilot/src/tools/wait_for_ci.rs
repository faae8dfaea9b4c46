//! Poll CI checks on the current pull request.

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

use super::{Tool, ToolOutput, ToolRequest, mentions_any};
use crate::io::process::{RunOptions, is_not_found, run_command};

const KEYWORDS: &[&str] = &["ci", "pipeline", "check", "workflow", "github actions"];
const POLL_TIMEOUT: Duration = Duration::from_secs(30);
/// Floor for the gap between polls.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WaitForCiTool {
    /// GitHub CLI executable.
    pub program: String,
}

impl Default for WaitForCiTool {
    fn default() -> Self {
        Self {
            program: "gh".to_string(),
        }
    }
}

enum Poll {
    Passed,
    Failed,
    Pending,
}

fn classify(exit_code: Option<i32>, output: &str) -> Poll {
    if exit_code == Some(0) {
        return Poll::Passed;
    }
    let lowered = output.to_lowercase();
    if lowered.contains("fail") && !lowered.contains("pending") {
        Poll::Failed
    } else {
        Poll::Pending
    }
}

impl Tool for WaitForCiTool {
    fn name(&self) -> &'static str {
        "wait_for_ci"
    }

    fn description(&self) -> &'static str {
        "Poll CI checks on the current branch until they pass or fail"
    }

    fn can_handle(&self, error_info: &str) -> bool {
        mentions_any(error_info, KEYWORDS)
    }

    fn run(&self, request: &ToolRequest) -> Result<ToolOutput> {
        let options = RunOptions::new(POLL_TIMEOUT, request.output_limit_bytes);
        let started = Instant::now();
        let interval = request.poll_interval.max(MIN_POLL_INTERVAL);
        let last_output = loop {
            let mut cmd = Command::new(&self.program);
            cmd.args(["pr", "checks"]).current_dir(&request.workdir);
            if let Some(branch) = &request.branch {
                cmd.arg("--branch").arg(branch);
            }

            let output = match run_command(cmd, &options) {
                Ok(output) => output,
                Err(err) if is_not_found(&err) => {
                    return Ok(ToolOutput::fail(format!(
                        "CI polling error: {} not found on PATH",
                        self.program
                    )));
                }
                Err(err) => return Err(err).context("poll CI checks"),
            };
            if output.timed_out {
                return Ok(ToolOutput::fail("CI polling error: gh pr checks timed out"));
            }
            let last_output = output.combined();
            let elapsed = started.elapsed();

            match classify(output.exit_code(), &last_output) {
                Poll::Passed => {
                    return Ok(ToolOutput::ok(format!(
                        "CI checks passed after {}s\n{last_output}",
                        elapsed.as_secs()
                    )));
                }
                Poll::Failed => {
                    return Ok(ToolOutput::fail(format!(
                        "CI checks failed after {}s\n{last_output}",
                        elapsed.as_secs()
                    )));
                }
                Poll::Pending => {}
            }

            if elapsed >= request.max_wait {
                break last_output;
            }
            info!(
                elapsed_secs = elapsed.as_secs(),
                max_wait_secs = request.max_wait.as_secs(),
                "CI still pending"
            );
            thread::sleep(interval.min(request.max_wait - elapsed));
            if started.elapsed() >= request.max_wait {
                break last_output;
            }
        };

        Ok(ToolOutput::fail(format!(
            "CI timed out after {}s\n{last_output}",
            request.max_wait.as_secs()
        )))
    }
}
