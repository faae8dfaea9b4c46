//! The execution control plane.
//!
//! [`Engine`] owns the run context and drives it through the transition
//! table: one handler per state, persisting after every handler, until the
//! run completes or needs operator input.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::context_tracker::ContextTracker;
use crate::core::spec::{ExitCondition, Spec};
use crate::core::states::{Event, State, TransitionError, TransitionRecord, transition};
use crate::core::text::truncate_chars;
use crate::core::types::{AgentOutcome, Disposition, SessionRecord, ToolOutput};
use crate::io::agent::{Agent, AgentRequest, AgentRun};
use crate::io::config::PilotConfig;
use crate::io::persistence::{PersistedState, SessionStore};
use crate::operator::{GuidanceRequest, Operator};
use crate::tools::{Tool, ToolRegistry, ToolRequest};

const HISTORY_SUMMARY_CHARS: usize = 500;
const PERSISTED_TEXT_CHARS: usize = 2_000;
const RECOVERY_MESSAGE_CHARS: usize = 500;
const HANDOFF_SUMMARY_CHARS: usize = 1_000;
const GUIDANCE_ERROR_CHARS: usize = 500;
const PATTERN_CHARS: usize = 100;
const LOG_PREVIEW_CHARS: usize = 200;
const ABORT: &str = "abort";

/// Mutable state of one run. Only the engine writes it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub spec: Spec,
    pub spec_path: String,
    pub session_id: String,
    pub state: State,
    pub step_index: usize,
    pub retry_count: u32,
    pub continuation_context: String,
    pub session_history: Vec<SessionRecord>,
    pub last_error: String,
    /// Every transition taken by this engine, in order.
    pub transitions: Vec<TransitionRecord>,
}

impl RunContext {
    fn new(spec: Spec, spec_path: String, session_id: String) -> Self {
        Self {
            spec,
            spec_path,
            session_id,
            state: State::Idle,
            step_index: 0,
            retry_count: 0,
            continuation_context: String::new(),
            session_history: Vec::new(),
            last_error: String::new(),
            transitions: Vec::new(),
        }
    }

    pub fn last_session(&self) -> Option<&SessionRecord> {
        self.session_history.last()
    }

    /// Durable projection with long text fields truncated.
    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            session_id: self.session_id.clone(),
            state: self.state,
            spec_path: self.spec_path.clone(),
            step_index: self.step_index,
            retry_count: self.retry_count,
            session_history: self
                .session_history
                .iter()
                .map(|record| SessionRecord {
                    summary: truncate_chars(&record.summary, HISTORY_SUMMARY_CHARS).to_string(),
                    ..record.clone()
                })
                .collect(),
            continuation_context: truncate_chars(&self.continuation_context, PERSISTED_TEXT_CHARS)
                .to_string(),
            last_error: truncate_chars(&self.last_error, PERSISTED_TEXT_CHARS).to_string(),
            working_directory: Some(self.spec.context.working_directory().to_path_buf()),
            completed: self.state == State::Completed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Skip the operator's plan approval.
    pub auto_approve: bool,
    /// Spec file path recorded for `resume`.
    pub spec_path: Option<PathBuf>,
    /// Adopt this session instead of creating a new one.
    pub session_id: Option<String>,
}

/// Where a `run` or `resume` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub session_id: String,
    pub state: State,
    pub disposition: Disposition,
    pub step_index: usize,
    pub retry_count: u32,
    /// Agent invocations recorded in the session history.
    pub sessions_run: usize,
    pub last_error: String,
}

pub struct Engine<A, O> {
    ctx: RunContext,
    config: PilotConfig,
    registry: ToolRegistry,
    store: SessionStore,
    agent: A,
    operator: O,
    tracker: ContextTracker,
    auto_approve: bool,
    disposition: Option<Disposition>,
}

impl<A: Agent, O: Operator> Engine<A, O> {
    /// Build an engine for `spec`, allocating a new session unless
    /// `options.session_id` names an existing one.
    pub fn new(
        spec: Spec,
        config: PilotConfig,
        registry: ToolRegistry,
        agent: A,
        operator: O,
        options: EngineOptions,
    ) -> Result<Self> {
        let store = SessionStore::new(&config.sessions_dir);
        let session_id = match options.session_id {
            Some(id) => id,
            None => store.create_session(&spec.goal)?,
        };
        let spec_path = options
            .spec_path
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let tracker = config.context_tracker();
        Ok(Self {
            ctx: RunContext::new(spec, spec_path, session_id),
            config,
            registry,
            store,
            agent,
            operator,
            tracker,
            auto_approve: options.auto_approve,
            disposition: None,
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &ContextTracker {
        &self.tracker
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    /// Start from `Idle` and drive until `Completed` or `NeedsInput`.
    ///
    /// Returns `Err` only for an invalid transition; collaborator failures are
    /// routed through the state machine.
    #[instrument(skip_all, fields(session_id = %self.ctx.session_id))]
    pub fn run(&mut self) -> Result<RunReport> {
        info!(goal = %self.ctx.spec.goal, steps = self.ctx.spec.steps.len(), "run starting");
        self.emit(Event::SpecLoaded)?;
        self.persist();
        self.drive()
    }

    /// Continue a persisted run.
    ///
    /// Transient states re-enter `Executing`. A run persisted in `NeedsInput`
    /// asks the operator for guidance first.
    #[instrument(skip_all, fields(session_id = %persisted.session_id))]
    pub fn resume(&mut self, persisted: &PersistedState) -> Result<RunReport> {
        self.ctx.session_id = persisted.session_id.clone();
        self.ctx.spec_path = persisted.spec_path.clone();
        self.ctx.state = persisted.resume_state();
        self.ctx.step_index = persisted.step_index;
        self.ctx.retry_count = persisted.retry_count;
        self.ctx.continuation_context = persisted.continuation_context.clone();
        self.ctx.session_history = persisted.session_history.clone();
        self.ctx.last_error = persisted.last_error.clone();
        info!(
            persisted_state = %persisted.state,
            state = %self.ctx.state,
            step_index = self.ctx.step_index,
            "resuming run"
        );

        if self.ctx.state == State::NeedsInput {
            self.handle_needs_input()?;
            self.persist();
        }
        self.drive()
    }

    fn drive(&mut self) -> Result<RunReport> {
        while !self.ctx.state.stops_run() {
            self.step()?;
            self.persist();
        }

        if self.ctx.state == State::Completed {
            self.finish_session();
        } else {
            self.disposition = Some(Disposition::Blocked);
            warn!(
                step_index = self.ctx.step_index,
                retry_count = self.ctx.retry_count,
                "run blocked, resume required"
            );
        }
        Ok(self.report())
    }

    /// Dispatch the handler for the current state.
    fn step(&mut self) -> Result<(), TransitionError> {
        match self.ctx.state {
            State::Idle => self.emit(Event::SpecLoaded),
            State::SpecCreation => self.handle_spec_creation(),
            State::Executing => self.handle_executing(),
            State::Verifying => self.handle_verifying(),
            State::Blocked => self.handle_blocked(),
            State::Recovering => self.handle_recovering(),
            State::NeedsInput => self.handle_needs_input(),
            State::ContextHandoff => self.handle_context_handoff(),
            State::Completed => Ok(()),
        }
    }

    fn handle_spec_creation(&mut self) -> Result<(), TransitionError> {
        if self.auto_approve {
            info!("plan auto-approved");
            return self.emit(Event::Approved);
        }
        match self.operator.approve(&self.ctx.spec) {
            Ok(true) => self.emit(Event::Approved),
            Ok(false) => {
                info!("plan rejected by operator");
                self.finish_early(Disposition::Rejected);
                Ok(())
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "no approval from operator, treating as rejection");
                self.finish_early(Disposition::Rejected);
                Ok(())
            }
        }
    }

    fn handle_executing(&mut self) -> Result<(), TransitionError> {
        let total = self.ctx.spec.steps.len();
        if self.ctx.step_index >= total {
            debug!("all steps done, verifying");
            return self.emit(Event::StepDone);
        }
        if self.tracker.should_handoff() {
            info!(usage_pct = self.tracker.usage_pct(), "context usage high, handing off");
            return self.emit(Event::ContextHigh);
        }

        let step = self.ctx.spec.steps[self.ctx.step_index].clone();
        info!(
            step = self.ctx.step_index + 1,
            total,
            step_id = %step.id,
            "executing step"
        );

        let request = AgentRequest {
            prompt: step.prompt().to_string(),
            workdir: self.ctx.spec.context.working_directory().to_path_buf(),
            model: self.ctx.spec.context.model.clone(),
            continuation: self.ctx.continuation_context.clone(),
            timeout: self.config.agent_timeout(),
            stream_path: Some(self.agent_log_path()),
        };
        self.tracker.reset();
        let run = match self.agent.invoke(&request) {
            Ok(run) => run,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "agent invocation failed");
                AgentRun::failure(
                    AgentOutcome::Failed { exit_code: None },
                    vec![format!("agent invocation failed: {err:#}")],
                )
            }
        };
        self.tracker.add_chars(run.streamed_chars);
        if self.tracker.should_warn() {
            warn!(usage_pct = self.tracker.usage_pct(), "agent context usage is high");
        }

        let summary = run.summary();
        self.ctx.session_history.push(SessionRecord {
            session_id: run.session_id.clone(),
            step_id: step.id.clone(),
            outcome: run.outcome,
            summary: summary.clone(),
            token_estimate: self.tracker.estimated_tokens(),
        });

        if run.outcome.succeeded() {
            info!(step_id = %step.id, agent_session = ?run.session_id, "step completed");
            self.ctx.continuation_context = summary;
            self.ctx.step_index += 1;
            self.ctx.retry_count = 0;
            if self.ctx.step_index >= total {
                return self.emit(Event::StepDone);
            }
            return Ok(());
        }

        warn!(step_id = %step.id, outcome = %run.outcome, "step failed");
        self.ctx.last_error = if summary.is_empty() {
            run.outcome.to_string()
        } else {
            summary
        };
        self.emit(Event::Error)
    }

    fn handle_verifying(&mut self) -> Result<(), TransitionError> {
        info!("verifying exit conditions");
        let workdir = self.ctx.spec.context.working_directory().to_path_buf();
        let preflight = self.ctx.spec.preflight.clone();

        if preflight.docker.enabled {
            if let Some(docker) = self.registry.get("docker") {
                let mut request = self.tool_request(workdir.clone());
                request.socket_paths = preflight.docker.socket_paths.clone();
                request.health_check = preflight.docker.health_check.clone();
                request.recovery_command = preflight.docker.recovery_command.clone();
                let output = run_tool(docker, &request);
                if let Some(restarted) = output.data.as_ref().and_then(|d| d.get("restarted")) {
                    info!(restarted = %restarted, "preflight restarted containers");
                } else if !output.success {
                    warn!(message = %preview(&output.message), "preflight docker check failed");
                }
            } else {
                warn!("docker tool not registered, skipping docker preflight");
            }
        }

        for command in &preflight.commands {
            let Some(tool) = self.registry.get("run_command") else {
                warn!("run_command tool not registered, skipping preflight commands");
                break;
            };
            let dir = command
                .working_directory
                .clone()
                .unwrap_or_else(|| workdir.clone());
            let mut request = self.tool_request(dir).with_command(&command.command);
            request.timeout = std::time::Duration::from_secs(command.timeout_secs);
            let output = run_tool(tool, &request);
            if output.success {
                debug!(command = %command.command, "preflight command passed");
            } else if command.fail_on_error {
                warn!(command = %command.command, "preflight command failed");
                self.ctx.last_error = format!("preflight command failed: {}", output.message);
                return self.emit(Event::SomeFailed);
            } else {
                warn!(command = %command.command, "preflight command failed (non-fatal)");
            }
        }

        let mut all_passed = true;
        for (idx, condition) in self.ctx.spec.exit_conditions.iter().enumerate() {
            let output = self.check_exit_condition(condition, &workdir);
            if output.success {
                info!(condition = idx + 1, kind = condition.kind(), message = %preview(&output.message), "exit condition passed");
            } else {
                warn!(condition = idx + 1, kind = condition.kind(), message = %preview(&output.message), "exit condition failed");
                all_passed = false;
                self.ctx.last_error = output.message;
            }
        }

        if all_passed {
            self.disposition = Some(Disposition::Finished);
            self.emit(Event::AllPassed)
        } else {
            self.emit(Event::SomeFailed)
        }
    }

    fn check_exit_condition(&self, condition: &ExitCondition, workdir: &std::path::Path) -> ToolOutput {
        let tool_name = match condition {
            ExitCondition::Command { .. } => "run_command",
            ExitCondition::Playwright { .. } => "playwright_qa",
        };
        let Some(tool) = self.registry.get(tool_name) else {
            return ToolOutput::fail(format!("{tool_name} tool not registered"));
        };
        let mut request = self.tool_request(workdir.to_path_buf());
        match condition {
            ExitCondition::Command {
                command,
                expect_exit_code,
            } => {
                request.command = Some(command.clone());
                request.expect_exit_code = *expect_exit_code;
            }
            ExitCondition::Playwright { url, assertions } => {
                request.url = Some(url.clone());
                request.assertions = assertions.clone();
                request.model = Some(self.ctx.spec.context.model.clone());
            }
        }
        run_tool(tool, &request)
    }

    fn handle_blocked(&mut self) -> Result<(), TransitionError> {
        self.ctx.retry_count += 1;
        info!(
            retry = self.ctx.retry_count,
            max_retries = self.ctx.spec.max_retries,
            last_error = %preview(&self.ctx.last_error),
            "blocked"
        );
        if self.ctx.retry_count > self.ctx.spec.max_retries {
            warn!("max retries exceeded, needs operator input");
            return self.emit(Event::MaxRetriesExceeded);
        }
        let found = self
            .registry
            .find_recovery_tool(&self.ctx.last_error)
            .map(|tool| tool.name());
        match found {
            Some(tool) => {
                info!(tool, "recovery tool found");
                self.emit(Event::ToolFound)
            }
            None => {
                warn!("no recovery tool matches, escalating");
                self.emit(Event::MaxRetriesExceeded)
            }
        }
    }

    fn handle_recovering(&mut self) -> Result<(), TransitionError> {
        let Some(tool) = self.registry.find_recovery_tool(&self.ctx.last_error) else {
            self.ctx.last_error = "no recovery tool available".to_string();
            return self.emit(Event::Error);
        };
        let name = tool.name();
        info!(tool = name, "recovering");

        let mut request = self.tool_request(self.ctx.spec.context.working_directory().to_path_buf());
        request.error_info = Some(self.ctx.last_error.clone());
        request.pattern = Some(truncate_chars(&self.ctx.last_error, PATTERN_CHARS).to_string());
        let output = run_tool(tool, &request);

        if output.success {
            info!(tool = name, message = %preview(&output.message), "recovery succeeded");
            self.ctx.continuation_context.push_str(&format!(
                "\nRecovery ({name}): {}",
                truncate_chars(&output.message, RECOVERY_MESSAGE_CHARS)
            ));
            self.emit(Event::Recovered)
        } else {
            warn!(tool = name, message = %preview(&output.message), "recovery failed");
            self.ctx.last_error = output.message;
            self.emit(Event::Error)
        }
    }

    fn handle_needs_input(&mut self) -> Result<(), TransitionError> {
        let request = GuidanceRequest {
            step_index: self.ctx.step_index,
            total_steps: self.ctx.spec.steps.len(),
            last_error: truncate_chars(&self.ctx.last_error, GUIDANCE_ERROR_CHARS).to_string(),
            retry_count: self.ctx.retry_count,
        };
        let input = match self.operator.guidance(&request) {
            Ok(input) => input.trim().to_string(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "no operator guidance, staying blocked");
                return Ok(());
            }
        };

        if input.eq_ignore_ascii_case(ABORT) {
            info!("run aborted by operator");
            self.finish_early(Disposition::Aborted);
            return Ok(());
        }
        info!("operator guidance received");
        self.ctx
            .continuation_context
            .push_str(&format!("\nUser guidance: {input}"));
        self.ctx.retry_count = 0;
        self.emit(Event::InputReceived)
    }

    fn handle_context_handoff(&mut self) -> Result<(), TransitionError> {
        info!(usage_pct = self.tracker.usage_pct(), "handing off to a fresh agent session");
        let handoff = self.ctx.last_session().map(|last| {
            format!(
                "Previous session summary (step {}): {}",
                self.ctx.step_index,
                truncate_chars(&last.summary, HANDOFF_SUMMARY_CHARS)
            )
        });
        if let Some(continuation) = handoff {
            self.ctx.continuation_context = continuation;
        }
        self.tracker.reset();
        self.emit(Event::HandoffComplete)
    }

    fn emit(&mut self, event: Event) -> Result<(), TransitionError> {
        let from = self.ctx.state;
        let to = transition(from, event)?;
        self.ctx.state = to;
        self.ctx.transitions.push(TransitionRecord {
            from,
            event: Some(event),
            to,
        });
        info!(from = %from, event = %event, to = %to, "transition");
        Ok(())
    }

    /// Operator escape hatch: straight to `Completed` without a table edge.
    fn finish_early(&mut self, disposition: Disposition) {
        let from = self.ctx.state;
        self.ctx.state = State::Completed;
        self.ctx.transitions.push(TransitionRecord {
            from,
            event: None,
            to: State::Completed,
        });
        self.disposition = Some(disposition);
        info!(from = %from, to = %State::Completed, disposition = ?disposition, "run ended by operator");
    }

    fn persist(&self) {
        if let Err(err) = self.store.save(&self.ctx.snapshot()) {
            warn!(err = %format!("{err:#}"), "failed to persist state");
        }
    }

    fn finish_session(&self) {
        if let Err(err) = self.store.complete() {
            warn!(err = %format!("{err:#}"), "failed to mark session completed");
        }
        match self.store.cleanup(self.config.max_sessions) {
            Ok(removed) if !removed.is_empty() => {
                debug!(removed = removed.len(), "pruned old sessions");
            }
            Ok(_) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "failed to prune sessions"),
        }
        info!(
            goal = %self.ctx.spec.goal,
            sessions_run = self.ctx.session_history.len(),
            "run completed"
        );
    }

    fn report(&self) -> RunReport {
        RunReport {
            session_id: self.ctx.session_id.clone(),
            state: self.ctx.state,
            disposition: self.disposition.unwrap_or(Disposition::Finished),
            step_index: self.ctx.step_index,
            retry_count: self.ctx.retry_count,
            sessions_run: self.ctx.session_history.len(),
            last_error: self.ctx.last_error.clone(),
        }
    }

    fn tool_request(&self, workdir: PathBuf) -> ToolRequest {
        ToolRequest::new(
            workdir,
            self.config.tool_timeout(),
            self.config.output_limit_bytes,
        )
    }

    fn agent_log_path(&self) -> PathBuf {
        self.store
            .session_dir(&self.ctx.session_id)
            .join(format!("agent-{:03}.jsonl", self.ctx.session_history.len() + 1))
    }
}

/// Run a tool, folding an `Err` into a failed output.
fn run_tool(tool: &dyn Tool, request: &ToolRequest) -> ToolOutput {
    match tool.run(request) {
        Ok(output) => output,
        Err(err) => {
            warn!(tool = tool.name(), err = %format!("{err:#}"), "tool could not run");
            ToolOutput::fail(format!("{} failed to run: {err:#}", tool.name()))
        }
    }
}

fn preview(text: &str) -> &str {
    truncate_chars(text, LOG_PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedAgent, ScriptedOperator, ScriptedTool, spec_with_steps, test_config,
    };

    fn engine(
        spec: Spec,
        config: PilotConfig,
        registry: ToolRegistry,
        agent: ScriptedAgent,
        operator: ScriptedOperator,
    ) -> Engine<ScriptedAgent, ScriptedOperator> {
        let options = EngineOptions {
            auto_approve: true,
            ..EngineOptions::default()
        };
        Engine::new(spec, config, registry, agent, operator, options).expect("engine")
    }

    #[test]
    fn snapshot_truncates_long_text() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = spec_with_steps(&["a"], "true", temp.path());
        let mut ctx = RunContext::new(spec, String::new(), "id".to_string());
        ctx.continuation_context = "c".repeat(5_000);
        ctx.last_error = "e".repeat(5_000);
        ctx.session_history.push(SessionRecord {
            session_id: None,
            step_id: "a".to_string(),
            outcome: AgentOutcome::Success,
            summary: "s".repeat(900),
            token_estimate: 0,
        });

        let snap = ctx.snapshot();
        assert_eq!(snap.continuation_context.len(), 2_000);
        assert_eq!(snap.last_error.len(), 2_000);
        assert_eq!(snap.session_history[0].summary.len(), 500);
        assert!(!snap.completed);
    }

    #[test]
    fn handoff_resets_tracker_and_carries_last_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = spec_with_steps(&["a", "b"], "true", temp.path());
        let config = test_config(&temp.path().join("sessions"));
        let mut engine = engine(
            spec,
            config,
            ToolRegistry::new(),
            ScriptedAgent::new(Vec::new()),
            ScriptedOperator::silent(),
        );
        engine.ctx.state = State::ContextHandoff;
        engine.ctx.step_index = 1;
        engine.ctx.session_history.push(SessionRecord {
            session_id: None,
            step_id: "a".to_string(),
            outcome: AgentOutcome::Success,
            summary: "did a".to_string(),
            token_estimate: 50_000,
        });
        engine.tracker.add_chars(400_000);

        engine.step().expect("handoff");

        assert_eq!(engine.ctx.state, State::Executing);
        assert_eq!(engine.tracker().estimated_tokens(), 0);
        assert_eq!(
            engine.ctx.continuation_context,
            "Previous session summary (step 1): did a"
        );
    }

    #[test]
    fn rejection_completes_without_running_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = spec_with_steps(&["a"], "true", temp.path());
        let config = test_config(&temp.path().join("sessions"));
        let agent = ScriptedAgent::new(Vec::new());
        let operator = ScriptedOperator::rejecting();
        let mut engine = Engine::new(
            spec,
            config,
            ToolRegistry::new(),
            agent,
            operator,
            EngineOptions::default(),
        )
        .expect("engine");

        let report = engine.run().expect("run");

        assert_eq!(report.state, State::Completed);
        assert_eq!(report.disposition, Disposition::Rejected);
        assert!(engine.agent().requests().is_empty());
        assert_eq!(
            engine.context().transitions.last(),
            Some(&TransitionRecord {
                from: State::SpecCreation,
                event: None,
                to: State::Completed,
            })
        );
        let stored = engine
            .store()
            .load(&report.session_id)
            .expect("load")
            .expect("present");
        assert!(stored.completed);
    }

    #[test]
    fn recovery_without_matching_tool_escalates_immediately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = spec_with_steps(&["a"], "true", temp.path());
        let config = test_config(&temp.path().join("sessions"));
        let agent = ScriptedAgent::new(vec![ScriptedAgent::failed("segfault")]);
        let mut engine = engine(
            spec,
            config,
            ToolRegistry::new(),
            agent,
            ScriptedOperator::silent(),
        );

        let report = engine.run().expect("run");

        assert_eq!(report.state, State::NeedsInput);
        assert_eq!(report.disposition, Disposition::Blocked);
        assert_eq!(report.retry_count, 1);
        assert_eq!(report.last_error, "segfault");
    }

    #[test]
    fn failed_recovery_replaces_last_error_and_reblocks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut spec = spec_with_steps(&["a"], "true", temp.path());
        spec.max_retries = 1;
        let config = test_config(&temp.path().join("sessions"));
        let tool = ScriptedTool::new("fixer", &["broken"])
            .with_outputs(vec![ToolOutput::fail("still broken")]);
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        let agent = ScriptedAgent::new(vec![ScriptedAgent::failed("broken build")]);
        let mut engine = engine(spec, config, registry, agent, ScriptedOperator::silent());

        let report = engine.run().expect("run");

        let path: Vec<State> = engine.context().transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                State::SpecCreation,
                State::Executing,
                State::Blocked,
                State::Recovering,
                State::Blocked,
                State::NeedsInput,
            ]
        );
        assert_eq!(report.last_error, "still broken");
        assert_eq!(report.retry_count, 2);
    }

    #[test]
    fn agent_error_is_treated_as_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut spec = spec_with_steps(&["a"], "true", temp.path());
        spec.max_retries = 0;
        let config = test_config(&temp.path().join("sessions"));
        // Empty script: every invocation returns Err.
        let agent = ScriptedAgent::new(Vec::new());
        let mut engine = engine(
            spec,
            config,
            ToolRegistry::new(),
            agent,
            ScriptedOperator::silent(),
        );

        let report = engine.run().expect("run");

        assert_eq!(report.state, State::NeedsInput);
        assert!(report.last_error.starts_with("agent invocation failed"));
        assert_eq!(engine.context().session_history.len(), 1);
    }

    #[test]
    fn fatal_preflight_command_fails_verification() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut spec = spec_with_steps(&["a"], "true", temp.path());
        spec.max_retries = 0;
        spec.preflight.commands.push(crate::core::spec::PreflightCommand {
            command: "echo nope; exit 1".to_string(),
            working_directory: None,
            timeout_secs: 10,
            fail_on_error: true,
        });
        let config = test_config(&temp.path().join("sessions"));
        let agent = ScriptedAgent::new(vec![ScriptedAgent::succeeded("done")]);
        let mut engine = engine(
            spec,
            config,
            crate::tools::default_registry("codex"),
            agent,
            ScriptedOperator::silent(),
        );

        let report = engine.run().expect("run");

        assert_eq!(report.state, State::NeedsInput);
        assert!(report.last_error.starts_with("preflight command failed: nope"));
    }

    #[test]
    fn non_fatal_preflight_failure_does_not_block() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut spec = spec_with_steps(&["a"], "true", temp.path());
        spec.preflight.commands.push(crate::core::spec::PreflightCommand {
            command: "exit 1".to_string(),
            working_directory: None,
            timeout_secs: 10,
            fail_on_error: false,
        });
        let config = test_config(&temp.path().join("sessions"));
        let agent = ScriptedAgent::new(vec![ScriptedAgent::succeeded("done")]);
        let mut engine = engine(
            spec,
            config,
            crate::tools::default_registry("codex"),
            agent,
            ScriptedOperator::silent(),
        );

        let report = engine.run().expect("run");

        assert_eq!(report.state, State::Completed);
        assert_eq!(report.disposition, Disposition::Finished);
    }

    #[test]
    fn persisted_state_tracks_every_handler() {
        let temp = tempfile::tempdir().expect("tempdir");
        let spec = spec_with_steps(&["a", "b"], "true", temp.path());
        let config = test_config(&temp.path().join("sessions"));
        let agent = ScriptedAgent::new(vec![
            ScriptedAgent::succeeded("did a"),
            ScriptedAgent::succeeded("did b"),
        ]);
        let mut engine = engine(
            spec,
            config,
            crate::tools::default_registry("codex"),
            agent,
            ScriptedOperator::silent(),
        );

        let report = engine.run().expect("run");

        let stored = engine
            .store()
            .load(&report.session_id)
            .expect("load")
            .expect("present");
        assert_eq!(stored.state, State::Completed);
        assert_eq!(stored.step_index, 2);
        assert_eq!(stored.continuation_context, "did b");
        assert_eq!(stored.session_history.len(), 2);
        assert_eq!(engine.store().active_session_id().expect("active"), None);
        let requests = engine.agent().requests();
        assert_eq!(requests[1].continuation, "did a");
    }
}
