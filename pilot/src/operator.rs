//! Human-in-the-loop collaborator.
//!
//! The engine asks the operator twice: to approve the plan before execution,
//! and for guidance once retries are exhausted.

use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, anyhow};

use crate::core::spec::{ExitCondition, Spec};

/// What the operator sees when a run is blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidanceRequest {
    /// Zero-based index of the step that is stuck.
    pub step_index: usize,
    pub total_steps: usize,
    /// Last failure text, already truncated for display.
    pub last_error: String,
    pub retry_count: u32,
}

impl GuidanceRequest {
    pub fn render(&self) -> String {
        format!(
            "Current step: {}/{}\nLast error: {}\nRetry count: {}",
            (self.step_index + 1).min(self.total_steps.max(1)),
            self.total_steps,
            self.last_error,
            self.retry_count
        )
    }
}

pub trait Operator {
    /// `Ok(false)` rejects the plan.
    fn approve(&mut self, spec: &Spec) -> Result<bool>;

    /// Free-form guidance for a blocked run. The text `abort` stops the run.
    fn guidance(&mut self, request: &GuidanceRequest) -> Result<String>;
}

/// Prompts on a terminal (or any line-oriented reader/writer pair).
pub struct ConsoleOperator<R, W> {
    input: R,
    output: W,
}

impl ConsoleOperator<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{prompt}").context("write prompt")?;
        self.output.flush().context("flush prompt")?;
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("read operator input")?;
        if read == 0 {
            return Err(anyhow!("no operator input (stdin closed)"));
        }
        Ok(line.trim().to_string())
    }

    /// Ask `question`, showing `default` in brackets. A blank answer takes it.
    pub fn ask_or(&mut self, question: &str, default: &str) -> Result<String> {
        let prompt = if default.is_empty() {
            format!("{question}: ")
        } else {
            format!("{question} [{default}]: ")
        };
        let answer = self.ask(&prompt)?;
        Ok(if answer.is_empty() {
            default.to_string()
        } else {
            answer
        })
    }

    /// Print one line to the operator.
    pub fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}").context("write to operator")
    }
}

impl<R: BufRead, W: Write> Operator for ConsoleOperator<R, W> {
    fn approve(&mut self, spec: &Spec) -> Result<bool> {
        write!(self.output, "{}", render_spec_summary(spec)).context("write spec summary")?;
        let answer = self.ask("\nApprove and start execution? [y/N] ")?;
        Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
    }

    fn guidance(&mut self, request: &GuidanceRequest) -> Result<String> {
        writeln!(self.output, "\n== NEEDS USER INPUT ==\n{}", request.render())
            .context("write guidance request")?;
        self.ask("\nProvide guidance (or 'abort' to stop): ")
    }
}

/// Approves every plan and forwards guidance requests to a closure.
///
/// For embedding the controller without a terminal.
pub struct CallbackOperator<F> {
    callback: F,
}

impl<F> CallbackOperator<F>
where
    F: FnMut(&GuidanceRequest) -> Result<String>,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Operator for CallbackOperator<F>
where
    F: FnMut(&GuidanceRequest) -> Result<String>,
{
    fn approve(&mut self, _spec: &Spec) -> Result<bool> {
        Ok(true)
    }

    fn guidance(&mut self, request: &GuidanceRequest) -> Result<String> {
        (self.callback)(request)
    }
}

/// Multi-line description of a spec: goal, steps, exit conditions, settings.
pub fn render_spec_summary(spec: &Spec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== SPEC: {} ==", spec.goal);
    let _ = writeln!(out, "Steps ({}):", spec.steps.len());
    for (idx, step) in spec.steps.iter().enumerate() {
        let _ = writeln!(out, "  {}. [{}] {}", idx + 1, step.id, step.description);
    }
    let _ = writeln!(out, "Exit conditions ({}):", spec.exit_conditions.len());
    for condition in &spec.exit_conditions {
        match condition {
            ExitCondition::Command {
                command,
                expect_exit_code,
            } => {
                let _ = writeln!(out, "  - command: {command} (expect exit {expect_exit_code})");
            }
            ExitCondition::Playwright { url, assertions } => {
                let _ = writeln!(out, "  - playwright: {url}");
                for assertion in assertions {
                    let _ = writeln!(out, "      - {assertion}");
                }
            }
        }
    }
    let _ = writeln!(out, "Max retries: {}", spec.max_retries);
    let dirs: Vec<String> = spec
        .context
        .working_directories
        .iter()
        .map(|d| d.display().to_string())
        .collect();
    if dirs.len() > 1 {
        let _ = writeln!(out, "Working dirs: {}", dirs.join(", "));
    } else {
        let _ = writeln!(out, "Working dir: {}", spec.context.working_directory().display());
    }
    let _ = writeln!(out, "Model: {}", spec.context.model);
    out
}
