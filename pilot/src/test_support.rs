//! Test-only collaborators and fixtures.
//!
//! Scripted doubles return predetermined results in order and record what they
//! were asked, so engine tests run without spawning agents or tools.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::spec::{ExitCondition, Spec, SpecContext, Step};
use crate::core::types::{AgentOutcome, ToolOutput};
use crate::io::agent::{Agent, AgentRequest, AgentRun};
use crate::io::config::PilotConfig;
use crate::operator::{GuidanceRequest, Operator};
use crate::tools::{Tool, ToolRequest, mentions_any};

/// Agent that replays a fixed list of runs. Once exhausted, every call errors.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    runs: RefCell<VecDeque<AgentRun>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<AgentRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn succeeded(summary: &str) -> AgentRun {
        AgentRun::success(vec![summary.to_string()])
    }

    pub fn failed(summary: &str) -> AgentRun {
        AgentRun::failure(
            AgentOutcome::Failed { exit_code: Some(1) },
            vec![summary.to_string()],
        )
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        self.requests.borrow_mut().push(request.clone());
        self.runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no more runs"))
    }
}

/// Recovery tool matched by keyword that replays fixed outputs.
///
/// Outputs past the end of the script repeat the last one. Calls are shared
/// through [`ScriptedTool::calls`] so a test can inspect them after the tool
/// moved into a registry.
#[derive(Debug, Clone)]
pub struct ScriptedTool {
    name: &'static str,
    keywords: Vec<&'static str>,
    outputs: Rc<RefCell<VecDeque<ToolOutput>>>,
    calls: Rc<RefCell<Vec<ToolRequest>>>,
}

impl ScriptedTool {
    pub fn new(name: &'static str, keywords: &[&'static str]) -> Self {
        Self {
            name,
            keywords: keywords.to_vec(),
            outputs: Rc::new(RefCell::new(VecDeque::new())),
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn with_outputs(self, outputs: Vec<ToolOutput>) -> Self {
        *self.outputs.borrow_mut() = outputs.into();
        self
    }

    pub fn calls(&self) -> Rc<RefCell<Vec<ToolRequest>>> {
        Rc::clone(&self.calls)
    }
}

impl Tool for ScriptedTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "scripted tool"
    }

    fn can_handle(&self, error_info: &str) -> bool {
        mentions_any(error_info, &self.keywords)
    }

    fn run(&self, request: &ToolRequest) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(request.clone());
        let mut outputs = self.outputs.borrow_mut();
        let output = if outputs.len() > 1 {
            outputs.pop_front()
        } else {
            outputs.front().cloned()
        };
        output.ok_or_else(|| anyhow!("scripted tool {} has no outputs", self.name))
    }
}

/// Operator with a fixed approval answer and a queue of guidance replies.
///
/// An empty queue behaves like a closed terminal: guidance returns `Err`.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    approve: bool,
    answers: VecDeque<String>,
    pub guidance_requests: Vec<GuidanceRequest>,
}

impl ScriptedOperator {
    /// Approves, and never has guidance.
    pub fn silent() -> Self {
        Self {
            approve: true,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self::default()
    }

    pub fn answering(answers: &[&str]) -> Self {
        Self {
            approve: true,
            answers: answers.iter().map(|a| (*a).to_string()).collect(),
            guidance_requests: Vec::new(),
        }
    }
}

impl Operator for ScriptedOperator {
    fn approve(&mut self, _spec: &Spec) -> Result<bool> {
        Ok(self.approve)
    }

    fn guidance(&mut self, request: &GuidanceRequest) -> Result<String> {
        self.guidance_requests.push(request.clone());
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted guidance left"))
    }
}

/// Spec with one step per id and a single command exit condition.
pub fn spec_with_steps(ids: &[&str], exit_command: &str, workdir: &Path) -> Spec {
    Spec {
        version: 1,
        goal: "test goal".to_string(),
        steps: ids
            .iter()
            .map(|id| Step {
                id: (*id).to_string(),
                description: format!("do {id}"),
                agent_prompt: None,
            })
            .collect(),
        exit_conditions: vec![ExitCondition::Command {
            command: exit_command.to_string(),
            expect_exit_code: 0,
        }],
        max_retries: 3,
        context: SpecContext {
            working_directories: vec![workdir.to_path_buf()],
            ..SpecContext::default()
        },
        preflight: Default::default(),
    }
}

/// Default config with sessions stored under `sessions_dir`.
pub fn test_config(sessions_dir: &Path) -> PilotConfig {
    PilotConfig {
        sessions_dir: PathBuf::from(sessions_dir),
        tool_timeout_secs: 30,
        ..PilotConfig::default()
    }
}
