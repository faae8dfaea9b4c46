//! Turning agent planning output into spec steps.
//!
//! Everything here is text in, values out: prompt wording, parsing the
//! structured and bullet-list plan formats, default file names, and the
//! markdown plan document. The interactive flow lives in [`crate::authoring`].

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::core::spec::{ExitCondition, Preflight, SUPPORTED_VERSION, Spec, SpecContext, Step};
use crate::core::text::{slugify, truncate_chars};

pub const DEFAULT_VERIFY_COMMAND: &str = "pytest -q";
pub const DEFAULT_ASSERTIONS: &str = "Page loads;No visible errors";
pub const DRAFT_STEP_COUNT: usize = 3;
pub const DEFAULT_PLAN_STEP_COUNT: usize = 5;

/// Exploration text beyond this is cut before it goes into the plan prompt.
const PLAN_CONTEXT_CHARS: usize = 4000;
/// Exploration text kept in the markdown plan.
const PLAN_DOC_EXPLORATION_CHARS: usize = 2000;
const SPEC_SLUG_CHARS: usize = 50;
const PLAN_SLUG_CHARS: usize = 40;

static STEP_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*STEP\s+\d+:\s*(.*)$").expect("static step regex"));
static FILES_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*FILES:\s*(.*)$").expect("static files regex"));
static PROMPT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*PROMPT:\s*(.*)$").expect("static prompt regex"));
static SUMMARY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)SUMMARY:\s*(\S.*)$").expect("static summary regex"));

/// One step of a generated plan, before it gets an id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannedStep {
    pub description: String,
    /// Files the step is expected to touch. Shown to the operator only.
    pub files: Vec<String>,
    pub agent_prompt: Option<String>,
}

impl PlannedStep {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub summary: String,
    pub steps: Vec<PlannedStep>,
}

pub fn explore_prompt(goal: &str) -> String {
    format!(
        "You are exploring a codebase to prepare for an implementation task.\n\
         Goal: {goal}\n\n\
         Do the following:\n\
         1. Identify the project structure and key directories.\n\
         2. Find files most relevant to the goal.\n\
         3. Note patterns, frameworks, and conventions used.\n\
         4. Summarise your findings so a planner can create detailed steps.\n\n\
         Output your findings as free-form text with clear headings."
    )
}

pub fn plan_prompt(goal: &str, exploration: &str, step_count: usize) -> String {
    let mut context = truncate_chars(exploration, PLAN_CONTEXT_CHARS).to_string();
    if context.len() < exploration.len() {
        context.push_str("\n... (truncated)");
    }
    format!(
        "You are a senior engineer creating an implementation plan.\n\n\
         GOAL: {goal}\n\n\
         CODEBASE EXPLORATION:\n{context}\n\n\
         Create exactly {step_count} implementation steps. \
         For each step, output in this exact format:\n\n\
         SUMMARY: <one-line description of the overall approach>\n\n\
         STEP 1: <short description>\n\
         FILES: <comma-separated file paths to modify>\n\
         PROMPT: <detailed instruction for the agent to execute this step>\n\n\
         STEP 2: <short description>\n\
         FILES: <comma-separated file paths>\n\
         PROMPT: <detailed instruction>\n\n\
         ... and so on.\n\n\
         Make each PROMPT detailed enough that the agent can execute it autonomously. \
         Reference specific files, functions, and patterns from the exploration."
    )
}

pub fn draft_prompt(goal: &str, step_count: usize) -> String {
    format!(
        "Create a concise implementation plan.\n\
         Goal: {goal}\n\
         Return exactly {step_count} one-line steps.\n\
         Output format: each line starts with '- ' and contains only the step text."
    )
}

/// Parse `SUMMARY:` plus `STEP n:` / `FILES:` / `PROMPT:` blocks.
///
/// A prompt runs until the next step header and may span lines. Headers
/// without a description are skipped. At most `step_count` steps are kept.
pub fn parse_plan_output(text: &str, step_count: usize) -> Plan {
    let summary = text
        .lines()
        .find_map(|line| SUMMARY_LINE.captures(line))
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default();

    let mut steps = Vec::new();
    let mut current: Option<(PlannedStep, Option<Vec<&str>>)> = None;
    for line in text.lines() {
        if let Some(caps) = STEP_HEADER.captures(line) {
            if let Some(done) = current.take() {
                steps.push(finish_step(done));
            }
            current = Some((PlannedStep::described(caps[1].trim()), None));
            continue;
        }
        let Some((step, prompt)) = current.as_mut() else {
            continue;
        };
        if let Some(lines) = prompt.as_mut() {
            lines.push(line);
        } else if let Some(caps) = PROMPT_LINE.captures(line) {
            *prompt = Some(vec![caps.get(1).map_or("", |m| m.as_str())]);
        } else if let Some(caps) = FILES_LINE.captures(line).filter(|_| step.files.is_empty()) {
            step.files = split_list(&caps[1], ',');
        }
    }
    if let Some(done) = current.take() {
        steps.push(finish_step(done));
    }

    steps.retain(|step| !step.description.is_empty());
    steps.truncate(step_count);
    Plan { summary, steps }
}

fn finish_step((mut step, prompt): (PlannedStep, Option<Vec<&str>>)) -> PlannedStep {
    step.agent_prompt = prompt
        .map(|lines| lines.join("\n").trim().to_string())
        .filter(|text| !text.is_empty());
    step
}

/// Steps from lines starting with `- ` or `* `, at most `step_count`.
pub fn parse_bullet_steps(text: &str, step_count: usize) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("- ").or_else(|| line.strip_prefix("* "))
        })
        .map(str::trim)
        .filter(|step| !step.is_empty())
        .take(step_count)
        .map(str::to_string)
        .collect()
}

/// Split on `sep`, trimming entries and dropping empty ones.
pub fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// `specs/<slug>.yaml` for a goal.
pub fn default_spec_path(goal: &str) -> PathBuf {
    PathBuf::from("specs").join(format!("{}.yaml", slugify(goal, SPEC_SLUG_CHARS, "new-spec")))
}

/// `YYYY-MM-DD-<slug>.md` for a goal.
pub fn plan_file_name(goal: &str, now: NaiveDateTime) -> String {
    format!(
        "{}-{}.md",
        now.format("%Y-%m-%d"),
        slugify(goal, PLAN_SLUG_CHARS, "plan")
    )
}

/// Everything needed to write a spec, collected by the authoring flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecDraft {
    pub goal: String,
    pub working_directories: Vec<PathBuf>,
    pub model: String,
    pub steps: Vec<PlannedStep>,
    pub exit_condition: ExitCondition,
    pub max_retries: u32,
}

impl SpecDraft {
    /// Steps are numbered `step1`, `step2`, ... in order.
    pub fn to_spec(&self) -> Spec {
        Spec {
            version: SUPPORTED_VERSION,
            goal: self.goal.clone(),
            steps: self
                .steps
                .iter()
                .enumerate()
                .map(|(idx, step)| Step {
                    id: format!("step{}", idx + 1),
                    description: step.description.clone(),
                    agent_prompt: step.agent_prompt.clone(),
                })
                .collect(),
            exit_conditions: vec![self.exit_condition.clone()],
            max_retries: self.max_retries,
            context: SpecContext {
                working_directories: self.working_directories.clone(),
                model: self.model.clone(),
            },
            preflight: Preflight::default(),
        }
    }
}

/// Markdown record of a generated plan.
pub fn render_plan_markdown(
    goal: &str,
    plan: &Plan,
    exploration: &str,
    exit_conditions: &[ExitCondition],
    now: NaiveDateTime,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Plan: {goal}");
    let _ = writeln!(out, "Generated: {}", now.format("%Y-%m-%d %H:%M"));
    let _ = writeln!(out);

    if !plan.summary.is_empty() {
        let _ = writeln!(out, "## Summary\n{}\n", plan.summary);
    }
    if !exploration.is_empty() {
        let condensed = truncate_chars(exploration, PLAN_DOC_EXPLORATION_CHARS);
        let _ = writeln!(out, "## Exploration Findings\n{condensed}");
        if condensed.len() < exploration.len() {
            let _ = writeln!(out, "\n... (truncated)");
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Steps");
    for (idx, step) in plan.steps.iter().enumerate() {
        let _ = writeln!(out, "### Step {}: {}", idx + 1, step.description);
        if !step.files.is_empty() {
            let _ = writeln!(out, "- Files: {}", step.files.join(", "));
        }
        if let Some(prompt) = &step.agent_prompt {
            let _ = writeln!(out, "- Agent prompt: {prompt}");
        }
        let _ = writeln!(out);
    }

    if !exit_conditions.is_empty() {
        let _ = writeln!(out, "## Exit Conditions");
        for condition in exit_conditions {
            match condition {
                ExitCondition::Command { command, .. } => {
                    let _ = writeln!(out, "- Command: `{command}`");
                }
                ExitCondition::Playwright { url, assertions } => {
                    let _ = writeln!(out, "- Playwright: {url}");
                    for assertion in assertions {
                        let _ = writeln!(out, "  - {assertion}");
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const FULL_PLAN: &str = "SUMMARY: Refactor the auth module to use JWT tokens.

STEP 1: Add JWT dependency
FILES: requirements.txt, setup.cfg
PROMPT: Add PyJWT to requirements.txt and setup.cfg dependencies

STEP 2: Create token service
FILES: src/auth/tokens.py
PROMPT: Create a new token service
that generates and validates JWT tokens

step 3: Update login endpoint
files: src/api/login.py, src/api/middleware.py
prompt: Update the login endpoint to return JWT tokens
";

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .expect("valid date")
    }

    #[test]
    fn parses_summary_files_and_multiline_prompts() {
        let plan = parse_plan_output(FULL_PLAN, 5);
        assert_eq!(plan.summary, "Refactor the auth module to use JWT tokens.");
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].description, "Add JWT dependency");
        assert_eq!(plan.steps[0].files, vec!["requirements.txt", "setup.cfg"]);
        assert_eq!(
            plan.steps[1].agent_prompt.as_deref(),
            Some("Create a new token service\nthat generates and validates JWT tokens")
        );
        assert_eq!(plan.steps[2].description, "Update login endpoint");
        assert_eq!(plan.steps[2].files.len(), 2);
    }

    #[test]
    fn plan_respects_step_count_and_missing_parts() {
        assert_eq!(parse_plan_output(FULL_PLAN, 2).steps.len(), 2);

        let bare = parse_plan_output("STEP 1: Only step\n", 5);
        assert_eq!(bare.summary, "");
        assert_eq!(bare.steps, vec![PlannedStep::described("Only step")]);

        assert_eq!(parse_plan_output("", 5), Plan::default());
        assert!(parse_plan_output("STEP 1:\nPROMPT: orphan", 5).steps.is_empty());
    }

    #[test]
    fn bullet_steps_accept_dash_and_star() {
        let text = "Here is the plan:\n- Create the endpoint\n  * Add tests \n-\n- Update docs\n- Extra";
        assert_eq!(
            parse_bullet_steps(text, 3),
            vec!["Create the endpoint", "Add tests", "Update docs"]
        );
        assert!(parse_bullet_steps("no bullets here", 3).is_empty());
    }

    #[test]
    fn plan_prompt_marks_truncated_exploration() {
        let short = plan_prompt("goal", "uses axum", 4);
        assert!(short.contains("uses axum"));
        assert!(short.contains("Create exactly 4 implementation steps"));
        assert!(!short.contains("(truncated)"));

        let long = plan_prompt("goal", &"x".repeat(10_000), 5);
        assert!(long.contains("... (truncated)"));
        assert!(!long.contains(&"x".repeat(PLAN_CONTEXT_CHARS + 1)));
    }

    #[test]
    fn default_names_are_slugged() {
        assert_eq!(
            default_spec_path("Fix flaky tests!"),
            PathBuf::from("specs/fix-flaky-tests.yaml")
        );
        assert_eq!(default_spec_path("???"), PathBuf::from("specs/new-spec.yaml"));
        assert_eq!(
            plan_file_name("Add health endpoint", noon()),
            "2026-03-14-add-health-endpoint.md"
        );
    }

    #[test]
    fn draft_numbers_steps_and_keeps_prompts() {
        let draft = SpecDraft {
            goal: "Add health endpoint".to_string(),
            working_directories: vec![PathBuf::from("~/a"), PathBuf::from("~/b")],
            model: "m1".to_string(),
            steps: vec![
                PlannedStep::described("Create route"),
                PlannedStep {
                    description: "Add test".to_string(),
                    files: vec!["tests/health.rs".to_string()],
                    agent_prompt: Some("Write the test".to_string()),
                },
            ],
            exit_condition: ExitCondition::Command {
                command: DEFAULT_VERIFY_COMMAND.to_string(),
                expect_exit_code: 0,
            },
            max_retries: 2,
        };
        let spec = draft.to_spec();
        assert!(spec.violations().is_empty());
        assert_eq!(spec.step_ids(), vec!["step1", "step2"]);
        assert_eq!(spec.steps[0].agent_prompt, None);
        assert_eq!(spec.steps[1].prompt(), "Write the test");
        assert_eq!(spec.context.working_directories.len(), 2);
        assert_eq!(spec.max_retries, 2);
    }

    #[test]
    fn markdown_lists_steps_and_conditions() {
        let plan = parse_plan_output(FULL_PLAN, 5);
        let conditions = vec![
            ExitCondition::Command {
                command: "cargo test".to_string(),
                expect_exit_code: 0,
            },
            ExitCondition::Playwright {
                url: "http://localhost:3000".to_string(),
                assertions: vec!["Page loads".to_string()],
            },
        ];
        let doc = render_plan_markdown("Use JWT", &plan, "Found Flask app", &conditions, noon());
        assert!(doc.starts_with("# Plan: Use JWT\nGenerated: 2026-03-14 12:30\n"));
        assert!(doc.contains("## Summary\nRefactor the auth module"));
        assert!(doc.contains("## Exploration Findings\nFound Flask app"));
        assert!(doc.contains("### Step 1: Add JWT dependency\n- Files: requirements.txt, setup.cfg"));
        assert!(doc.contains("- Command: `cargo test`"));
        assert!(doc.contains("- Playwright: http://localhost:3000\n  - Page loads"));

        let bare = render_plan_markdown("g", &Plan::default(), "", &[], noon());
        assert!(!bare.contains("## Summary"));
        assert!(!bare.contains("## Exploration Findings"));
        assert!(!bare.contains("## Exit Conditions"));
    }
}
