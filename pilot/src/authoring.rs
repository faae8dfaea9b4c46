//! Interactive spec authoring.
//!
//! [`SpecAuthor`] backs the `create-spec` and `spec` commands. It asks the
//! agent for a plan, lets the operator accept, regenerate or replace it, and
//! writes the result as a validated spec file. Agent failures never abort
//! authoring; each one falls back to a simpler way of getting steps, ending
//! with manual entry.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::core::plan::{
    DEFAULT_ASSERTIONS, DEFAULT_PLAN_STEP_COUNT, DEFAULT_VERIFY_COMMAND, DRAFT_STEP_COUNT, Plan,
    PlannedStep, SpecDraft, default_spec_path, draft_prompt, explore_prompt, parse_bullet_steps,
    parse_plan_output, plan_file_name, plan_prompt, render_plan_markdown, split_list,
};
use crate::core::spec::{ExitCondition, parse_spec};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::config::PilotConfig;
use crate::io::spec_file::expand_home;
use crate::io::write_atomic;
use crate::operator::ConsoleOperator;

pub const EXPLORE_TIMEOUT: Duration = Duration::from_secs(180);
pub const PLAN_TIMEOUT: Duration = Duration::from_secs(120);
const PROMPT_PREVIEW_CHARS: usize = 80;

/// Answers supplied on the command line. Anything missing is asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftOptions {
    pub prompt: Option<String>,
    /// Verification command for a `command` exit condition.
    pub exit_condition: Option<String>,
    /// Use a `playwright` exit condition against this URL instead.
    pub playwright_url: Option<String>,
    /// Semicolon-separated assertions for `playwright_url`.
    pub assertions: Option<String>,
    /// Comma-separated working directories.
    pub working_directory: Option<String>,
    pub model: Option<String>,
    pub max_retries: Option<u32>,
    pub output: Option<PathBuf>,
}

/// Extra knobs for the explore-then-plan flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub step_count: usize,
    pub explore: bool,
    /// Write a markdown plan under `plans_dir` when exploration succeeded.
    pub plan_file: bool,
    pub plans_dir: PathBuf,
    /// Run the spec right away without asking.
    pub run: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            step_count: DEFAULT_PLAN_STEP_COUNT,
            explore: true,
            plan_file: true,
            plans_dir: PathBuf::from("docs/plans"),
            run: false,
        }
    }
}

/// What authoring produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authored {
    pub spec_path: PathBuf,
    pub plan_path: Option<PathBuf>,
    /// The spec should be run now, with approval skipped.
    pub run_now: bool,
}

/// Where new spec steps run and with which model.
struct Target {
    working_directories: Vec<PathBuf>,
    model: String,
}

impl Target {
    fn workdir(&self) -> PathBuf {
        let primary = self
            .working_directories
            .first()
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("."));
        expand_home(primary)
    }
}

pub struct SpecAuthor<'a, A, R, W> {
    agent: &'a A,
    console: ConsoleOperator<R, W>,
    config: &'a PilotConfig,
}

impl<'a, A: Agent, R: BufRead, W: Write> SpecAuthor<'a, A, R, W> {
    pub fn new(agent: &'a A, console: ConsoleOperator<R, W>, config: &'a PilotConfig) -> Self {
        Self {
            agent,
            console,
            config,
        }
    }

    /// Draft a short bullet plan, let the operator accept it or type steps,
    /// then write the spec. `Ok(None)` means nothing was written.
    #[instrument(skip_all)]
    pub fn create_spec(mut self, options: &DraftOptions) -> Result<Option<Authored>> {
        let Some(goal) = self.goal(options, "Prompt")? else {
            return Ok(None);
        };
        let exit_condition = self.exit_condition(options)?;
        let target = self.target(options);

        self.console.say("\nGenerating plan with the agent...\n")?;
        let mut steps = Vec::new();
        match self.draft_steps(&goal, &target, DRAFT_STEP_COUNT) {
            Ok(drafted) => {
                for (idx, step) in drafted.iter().enumerate() {
                    self.console.say(&format!("  {}. {step}", idx + 1))?;
                }
                self.console.say("")?;
                if is_yes(&self.console.ask_or("Accept plan? [Y/n]", "y")?) {
                    steps = drafted.into_iter().map(PlannedStep::described).collect();
                }
            }
            Err(err) => {
                self.console
                    .say(&format!("Agent failed: {err:#}\nEntering steps manually.\n"))?;
            }
        }
        if steps.is_empty() {
            steps = self.manual_steps()?;
        }
        if steps.is_empty() {
            self.console.say("At least one step is required.")?;
            return Ok(None);
        }

        let spec_path = self.output_path(&goal, options)?;
        let draft = self.finish_draft(goal, target, steps, exit_condition, options)?;
        self.write_spec(&draft, &spec_path)?;
        Ok(Some(Authored {
            spec_path,
            plan_path: None,
            run_now: false,
        }))
    }

    /// Explore the codebase, turn the findings into a detailed plan, review
    /// it with the operator, then write the spec and a markdown plan.
    #[instrument(skip_all, fields(steps = plan_options.step_count, explore = plan_options.explore))]
    pub fn plan_spec(
        mut self,
        options: &DraftOptions,
        plan_options: &PlanOptions,
    ) -> Result<Option<Authored>> {
        let Some(goal) = self.goal(options, "What do you want to build/fix?")? else {
            return Ok(None);
        };
        let exit_condition = self.exit_condition(options)?;
        let target = self.target(options);
        let step_count = plan_options.step_count.max(1);

        let mut exploration = String::new();
        if plan_options.explore {
            self.console.say("\nExploring codebase with the agent...\n")?;
            match self.ask_agent(explore_prompt(&goal), &target, EXPLORE_TIMEOUT) {
                Ok(text) => {
                    exploration = text;
                    self.console.say("Exploration complete.\n")?;
                }
                Err(err) => {
                    self.console.say(&format!(
                        "Exploration failed: {err:#}\nFalling back to simple planning.\n"
                    ))?;
                }
            }
        }

        let mut plan = Plan::default();
        if !exploration.is_empty() {
            self.console.say("Generating detailed plan...\n")?;
            match self.structured_plan(&goal, &exploration, &target, step_count) {
                Ok(generated) => plan = generated,
                Err(err) => {
                    self.console.say(&format!(
                        "Detailed planning failed: {err:#}\nFalling back to simple planning.\n"
                    ))?;
                }
            }
        }
        if plan.steps.is_empty() {
            self.console.say("Generating plan with the agent...\n")?;
            match self.draft_steps(&goal, &target, step_count) {
                Ok(drafted) => {
                    plan.steps = drafted.into_iter().map(PlannedStep::described).collect();
                }
                Err(err) => {
                    self.console
                        .say(&format!("Agent failed: {err:#}\nEntering steps manually.\n"))?;
                }
            }
        }
        if plan.steps.is_empty() {
            plan.steps = self.manual_steps()?;
        }
        if plan.steps.is_empty() {
            self.console.say("At least one step is required.")?;
            return Ok(None);
        }

        self.show_plan(&plan)?;
        let choice = self
            .console
            .ask_or("Accept plan? [Y/n/r=regenerate]", "y")?
            .to_lowercase();
        match choice.as_str() {
            "y" | "yes" => {}
            "r" | "regenerate" => {
                let regenerated = if exploration.is_empty() {
                    self.draft_steps(&goal, &target, step_count).map(|drafted| Plan {
                        summary: String::new(),
                        steps: drafted.into_iter().map(PlannedStep::described).collect(),
                    })
                } else {
                    self.structured_plan(&goal, &exploration, &target, step_count)
                };
                match regenerated {
                    Ok(fresh) => {
                        plan = fresh;
                        self.show_plan(&plan)?;
                    }
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "plan regeneration failed");
                        self.console
                            .say("Regeneration failed. Keeping original plan.")?;
                    }
                }
            }
            _ => {
                self.console.say("Aborted.")?;
                return Ok(None);
            }
        }

        let spec_path = self.output_path(&goal, options)?;
        let draft =
            self.finish_draft(goal, target, plan.steps.clone(), exit_condition, options)?;
        self.write_spec(&draft, &spec_path)?;

        let mut plan_path = None;
        if !exploration.is_empty() && plan_options.plan_file {
            let now = Local::now().naive_local();
            let path = plan_options
                .plans_dir
                .join(plan_file_name(&draft.goal, now));
            let doc = render_plan_markdown(
                &draft.goal,
                &plan,
                &exploration,
                std::slice::from_ref(&draft.exit_condition),
                now,
            );
            write_atomic(&path, &doc)?;
            self.console
                .say(&format!("Created plan: {}", path.display()))?;
            plan_path = Some(path);
        }

        let run_now = plan_options.run || is_yes(&self.console.ask_or("Run spec now? [y/N]", "n")?);
        Ok(Some(Authored {
            spec_path,
            plan_path,
            run_now,
        }))
    }

    fn goal(&mut self, options: &DraftOptions, question: &str) -> Result<Option<String>> {
        let goal = match options.prompt.as_deref().map(str::trim) {
            Some(prompt) if !prompt.is_empty() => prompt.to_string(),
            _ => self.console.ask_or(question, "")?,
        };
        if goal.is_empty() {
            self.console.say("A prompt is required.")?;
            return Ok(None);
        }
        Ok(Some(goal))
    }

    fn exit_condition(&mut self, options: &DraftOptions) -> Result<ExitCondition> {
        if let Some(url) = &options.playwright_url {
            let raw = options.assertions.as_deref().unwrap_or(DEFAULT_ASSERTIONS);
            return Ok(ExitCondition::Playwright {
                url: url.clone(),
                assertions: split_list(raw, ';'),
            });
        }
        let command = match &options.exit_condition {
            Some(command) => command.clone(),
            None => self
                .console
                .ask_or("Verification command", DEFAULT_VERIFY_COMMAND)?,
        };
        Ok(ExitCondition::Command {
            command,
            expect_exit_code: 0,
        })
    }

    fn target(&self, options: &DraftOptions) -> Target {
        let raw = options
            .working_directory
            .as_deref()
            .unwrap_or(&self.config.working_directory);
        let mut working_directories: Vec<PathBuf> =
            split_list(raw, ',').into_iter().map(PathBuf::from).collect();
        if working_directories.is_empty() {
            working_directories.push(PathBuf::from("."));
        }
        Target {
            working_directories,
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
        }
    }

    /// One agent round trip. Agent messages are echoed as they are collected.
    fn ask_agent(&mut self, prompt: String, target: &Target, timeout: Duration) -> Result<String> {
        let request = AgentRequest {
            prompt,
            workdir: target.workdir(),
            model: target.model.clone(),
            continuation: String::new(),
            timeout,
            stream_path: None,
        };
        let run = self.agent.invoke(&request)?;
        for line in &run.output_lines {
            self.console.say(line)?;
        }
        if !run.outcome.succeeded() {
            bail!("agent {}", run.outcome);
        }
        let text = run.output_lines.join("\n");
        if text.trim().is_empty() {
            bail!("agent returned no output");
        }
        Ok(text)
    }

    fn draft_steps(&mut self, goal: &str, target: &Target, count: usize) -> Result<Vec<String>> {
        let text = self.ask_agent(draft_prompt(goal, count), target, PLAN_TIMEOUT)?;
        let steps = parse_bullet_steps(&text, count);
        if steps.is_empty() {
            bail!("agent returned no parseable steps");
        }
        Ok(steps)
    }

    fn structured_plan(
        &mut self,
        goal: &str,
        exploration: &str,
        target: &Target,
        count: usize,
    ) -> Result<Plan> {
        let text = self.ask_agent(plan_prompt(goal, exploration, count), target, PLAN_TIMEOUT)?;
        let plan = parse_plan_output(&text, count);
        if plan.steps.is_empty() {
            bail!("agent returned no parseable plan steps");
        }
        Ok(plan)
    }

    fn manual_steps(&mut self) -> Result<Vec<PlannedStep>> {
        self.console
            .say("Enter steps (blank description to finish):")?;
        let mut steps = Vec::new();
        loop {
            let description = self
                .console
                .ask_or(&format!("Step {} description", steps.len() + 1), "")?;
            if description.is_empty() {
                return Ok(steps);
            }
            steps.push(PlannedStep::described(description));
        }
    }

    fn show_plan(&mut self, plan: &Plan) -> Result<()> {
        if !plan.summary.is_empty() {
            self.console.say(&format!("Summary: {}\n", plan.summary))?;
        }
        for (idx, step) in plan.steps.iter().enumerate() {
            let mut line = format!("  {}. {}", idx + 1, step.description);
            if !step.files.is_empty() {
                line.push_str(&format!("  [{}]", step.files.join(", ")));
            }
            self.console.say(&line)?;
            if let Some(prompt) = &step.agent_prompt {
                let preview: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
                let ellipsis = if preview.len() < prompt.len() { "..." } else { "" };
                self.console
                    .say(&format!("     Agent: {preview}{ellipsis}"))?;
            }
        }
        self.console.say("")
    }

    fn finish_draft(
        &mut self,
        goal: String,
        target: Target,
        steps: Vec<PlannedStep>,
        exit_condition: ExitCondition,
        options: &DraftOptions,
    ) -> Result<SpecDraft> {
        let max_retries = match options.max_retries {
            Some(max) => max,
            None => {
                let raw = self
                    .console
                    .ask_or("Max retries", &self.config.max_retries.to_string())?;
                raw.parse()
                    .with_context(|| format!("invalid max retries: {raw}"))?
            }
        };
        Ok(SpecDraft {
            goal,
            working_directories: target.working_directories,
            model: target.model,
            steps,
            exit_condition,
            max_retries,
        })
    }

    fn output_path(&mut self, goal: &str, options: &DraftOptions) -> Result<PathBuf> {
        let suggested = options
            .output
            .clone()
            .unwrap_or_else(|| default_spec_path(goal));
        let answer = self
            .console
            .ask_or("Output", &suggested.display().to_string())?;
        Ok(PathBuf::from(answer))
    }

    /// Validate the draft as a spec and write it to `output`.
    fn write_spec(&mut self, draft: &SpecDraft, output: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(&draft.to_spec()).context("serialize spec yaml")?;
        parse_spec(&yaml).context("generated spec is invalid")?;
        write_atomic(output, &yaml)?;
        info!(path = %output.display(), steps = draft.steps.len(), "spec written");
        self.console
            .say(&format!("\nCreated spec: {}", output.display()))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::spec::Spec;
    use crate::io::agent::AgentRun;
    use crate::test_support::ScriptedAgent;

    const EXPLORATION: &str = "Project uses axum with routes in src/routes/";
    const PLAN: &str = "SUMMARY: Add /health endpoint.

STEP 1: Create route
FILES: src/routes.rs
PROMPT: Add GET /health returning 200

STEP 2: Add test
FILES: tests/routes.rs
PROMPT: Write a test for the health endpoint
";

    fn lines(text: &str) -> AgentRun {
        AgentRun::success(text.lines().map(str::to_string).collect())
    }

    fn options() -> DraftOptions {
        DraftOptions {
            prompt: Some("Add health endpoint".to_string()),
            exit_condition: Some("cargo test".to_string()),
            ..DraftOptions::default()
        }
    }

    fn plan_options(plans_dir: &Path) -> PlanOptions {
        PlanOptions {
            plans_dir: plans_dir.to_path_buf(),
            ..PlanOptions::default()
        }
    }

    /// Run `plan_spec` against scripted operator `input`; returns the result
    /// and everything shown to the operator.
    fn plan(
        agent: &ScriptedAgent,
        input: &str,
        options: &DraftOptions,
        plan_options: &PlanOptions,
    ) -> (Option<Authored>, String) {
        let config = PilotConfig::default();
        let mut out = Vec::new();
        let author = SpecAuthor::new(agent, ConsoleOperator::new(input.as_bytes(), &mut out), &config);
        let authored = author.plan_spec(options, plan_options).expect("plan_spec");
        (authored, String::from_utf8(out).expect("utf8"))
    }

    fn create(agent: &ScriptedAgent, input: &str, options: &DraftOptions) -> (Option<Authored>, String) {
        let config = PilotConfig::default();
        let mut out = Vec::new();
        let author = SpecAuthor::new(agent, ConsoleOperator::new(input.as_bytes(), &mut out), &config);
        let authored = author.create_spec(options).expect("create_spec");
        (authored, String::from_utf8(out).expect("utf8"))
    }

    fn written(path: &Path) -> Spec {
        parse_spec(&fs::read_to_string(path).expect("read spec")).expect("valid spec")
    }

    #[test]
    fn explore_then_plan_writes_spec_and_markdown() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("specs/health.yaml");
        let plans_dir = temp.path().join("docs/plans");
        let agent = ScriptedAgent::new(vec![lines(EXPLORATION), lines(PLAN)]);

        let input = format!("y\n{}\n3\nn\n", spec_path.display());
        let (authored, shown) = plan(&agent, &input, &options(), &plan_options(&plans_dir));
        let authored = authored.expect("spec written");

        assert_eq!(authored.spec_path, spec_path);
        assert!(!authored.run_now);
        let spec = written(&spec_path);
        assert_eq!(spec.goal, "Add health endpoint");
        assert_eq!(spec.step_ids(), vec!["step1", "step2"]);
        assert_eq!(spec.steps[0].prompt(), "Add GET /health returning 200");
        assert_eq!(spec.max_retries, 3);
        assert_eq!(
            spec.exit_conditions,
            vec![ExitCondition::Command {
                command: "cargo test".to_string(),
                expect_exit_code: 0
            }]
        );

        let plan_path = authored.plan_path.expect("plan file");
        assert!(plan_path.starts_with(&plans_dir));
        let doc = fs::read_to_string(&plan_path).expect("read plan");
        assert!(doc.contains("# Plan: Add health endpoint"));
        assert!(doc.contains(EXPLORATION));
        assert!(doc.contains("- Command: `cargo test`"));

        let requests = agent.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].timeout, EXPLORE_TIMEOUT);
        assert!(requests[1].prompt.contains(EXPLORATION));
        assert!(shown.contains("Summary: Add /health endpoint."));
        assert!(shown.contains("  1. Create route  [src/routes.rs]"));
    }

    #[test]
    fn failed_exploration_falls_back_to_bullet_plan_without_markdown() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("spec.yaml");
        let plans_dir = temp.path().join("docs/plans");
        let agent = ScriptedAgent::new(vec![
            ScriptedAgent::failed("agent timed out"),
            lines("- Create the endpoint\n- Add tests\n- Update docs"),
        ]);

        let input = format!("y\n{}\n3\nn\n", spec_path.display());
        let (authored, shown) = plan(&agent, &input, &options(), &plan_options(&plans_dir));
        let authored = authored.expect("spec written");

        assert_eq!(authored.plan_path, None);
        assert!(!plans_dir.exists());
        assert_eq!(written(&spec_path).steps.len(), 3);
        assert!(shown.contains("Exploration failed"));
    }

    #[test]
    fn skipping_exploration_asks_the_agent_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("spec.yaml");
        let agent = ScriptedAgent::new(vec![lines("- Step one\n- Step two")]);
        let plan_options = PlanOptions {
            explore: false,
            ..plan_options(temp.path())
        };

        let input = format!("y\n{}\n3\nn\n", spec_path.display());
        let (authored, _) = plan(&agent, &input, &options(), &plan_options);

        assert!(authored.is_some());
        assert_eq!(agent.requests().len(), 1);
        assert!(agent.requests()[0].prompt.contains("Return exactly 5 one-line steps"));
        assert_eq!(written(&spec_path).steps[1].description, "Step two");
    }

    #[test]
    fn agent_failures_fall_back_to_manual_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("spec.yaml");
        let agent = ScriptedAgent::new(Vec::new());

        let input = format!("Manual step one\n\ny\n{}\n3\nn\n", spec_path.display());
        let (authored, shown) = plan(&agent, &input, &options(), &plan_options(temp.path()));

        assert!(authored.is_some());
        let spec = written(&spec_path);
        assert_eq!(spec.steps.len(), 1);
        assert_eq!(spec.steps[0].description, "Manual step one");
        assert!(shown.contains("Entering steps manually."));
    }

    #[test]
    fn regenerate_replaces_the_plan() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("spec.yaml");
        let agent = ScriptedAgent::new(vec![lines("- First draft"), lines("- Better draft\n- And more")]);
        let plan_options = PlanOptions {
            explore: false,
            ..plan_options(temp.path())
        };

        let input = format!("r\n{}\n3\nn\n", spec_path.display());
        let (authored, _) = plan(&agent, &input, &options(), &plan_options);

        assert!(authored.is_some());
        let spec = written(&spec_path);
        assert_eq!(spec.steps.len(), 2);
        assert_eq!(spec.steps[0].description, "Better draft");
    }

    #[test]
    fn failed_regeneration_keeps_the_original_plan() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("spec.yaml");
        let agent = ScriptedAgent::new(vec![lines("- Only draft")]);
        let plan_options = PlanOptions {
            explore: false,
            ..plan_options(temp.path())
        };

        let input = format!("r\n{}\n3\nn\n", spec_path.display());
        let (_, shown) = plan(&agent, &input, &options(), &plan_options);

        assert!(shown.contains("Regeneration failed. Keeping original plan."));
        assert_eq!(written(&spec_path).steps[0].description, "Only draft");
    }

    #[test]
    fn rejecting_the_plan_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ScriptedAgent::new(vec![lines("- Step one")]);
        let plan_options = PlanOptions {
            explore: false,
            ..plan_options(temp.path())
        };

        let (authored, shown) = plan(&agent, "n\n", &options(), &plan_options);

        assert_eq!(authored, None);
        assert!(shown.contains("Aborted."));
        assert_eq!(fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn missing_prompt_is_refused() {
        let agent = ScriptedAgent::new(Vec::new());
        let options = DraftOptions {
            prompt: None,
            ..options()
        };
        let (authored, shown) = plan(&agent, "\n", &options, &PlanOptions::default());
        assert_eq!(authored, None);
        assert!(shown.contains("A prompt is required."));
        assert!(agent.requests().is_empty());
    }

    #[test]
    fn comma_separated_working_directories_are_kept_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("spec.yaml");
        let agent = ScriptedAgent::new(vec![lines("- Step one")]);
        let options = DraftOptions {
            working_directory: Some("~/a, ~/b".to_string()),
            model: Some("m2".to_string()),
            max_retries: Some(1),
            ..options()
        };
        let plan_options = PlanOptions {
            explore: false,
            run: true,
            ..plan_options(temp.path())
        };

        let input = format!("y\n{}\n", spec_path.display());
        let (authored, _) = plan(&agent, &input, &options, &plan_options);

        assert!(authored.expect("spec written").run_now);
        let raw: serde_yaml::Value =
            serde_yaml::from_str(&fs::read_to_string(&spec_path).expect("read")).expect("yaml");
        assert_eq!(
            raw["context"]["working_directory"],
            serde_yaml::from_str::<serde_yaml::Value>("[\"~/a\", \"~/b\"]").expect("yaml")
        );
        assert_eq!(raw["context"]["model"].as_str(), Some("m2"));
        assert_eq!(raw["max_retries"].as_u64(), Some(1));
        assert!(raw.get("preflight").is_none());
        assert_eq!(agent.requests()[0].model, "m2");
    }

    #[test]
    fn create_spec_accepts_drafted_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("spec.yaml");
        let agent = ScriptedAgent::new(vec![lines("- Write handler\n- Wire route\n- Test it")]);

        let input = format!("\n{}\n\n", spec_path.display());
        let (authored, shown) = create(&agent, &input, &options());

        let authored = authored.expect("spec written");
        assert_eq!(authored.plan_path, None);
        assert!(!authored.run_now);
        let spec = written(&spec_path);
        assert_eq!(spec.step_ids(), vec!["step1", "step2", "step3"]);
        assert_eq!(spec.steps[2].description, "Test it");
        assert_eq!(spec.max_retries, PilotConfig::default().max_retries);
        assert!(agent.requests()[0].prompt.contains("Return exactly 3 one-line steps"));
        assert!(shown.contains("  1. Write handler"));
    }

    #[test]
    fn create_spec_declined_draft_switches_to_manual_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec_path = temp.path().join("spec.yaml");
        let agent = ScriptedAgent::new(vec![lines("- Drafted")]);
        let options = DraftOptions {
            exit_condition: None,
            playwright_url: Some("http://localhost:3000".to_string()),
            ..options()
        };

        let input = format!("n\nTyped step\n\n{}\n2\n", spec_path.display());
        let (authored, _) = create(&agent, &input, &options);

        assert!(authored.is_some());
        let spec = written(&spec_path);
        assert_eq!(spec.steps.len(), 1);
        assert_eq!(spec.steps[0].description, "Typed step");
        assert_eq!(spec.max_retries, 2);
        assert_eq!(
            spec.exit_conditions[0],
            ExitCondition::Playwright {
                url: "http://localhost:3000".to_string(),
                assertions: vec!["Page loads".to_string(), "No visible errors".to_string()],
            }
        );
    }

    #[test]
    fn create_spec_asks_for_verification_command_and_needs_a_step() {
        let agent = ScriptedAgent::new(Vec::new());
        let options = DraftOptions {
            exit_condition: None,
            ..options()
        };

        let (authored, shown) = create(&agent, "\n\n", &options);

        assert_eq!(authored, None);
        assert!(shown.contains("Verification command [pytest -q]: "));
        assert!(shown.contains("At least one step is required."));
    }

    #[test]
    fn invalid_max_retries_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ScriptedAgent::new(vec![lines("- Step")]);
        let config = PilotConfig::default();
        let input = format!("y\n{}\nmany\n", temp.path().join("spec.yaml").display());
        let mut out = Vec::new();
        let author =
            SpecAuthor::new(&agent, ConsoleOperator::new(input.as_bytes(), &mut out), &config);
        let err = author.create_spec(&options()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid max retries: many"));
    }
}
