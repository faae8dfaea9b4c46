//! Recovery and verification tools.
//!
//! A tool is picked for a failure by keyword: the registry walks tools in
//! registration order and returns the first whose [`Tool::can_handle`] matches
//! the failure text. Tools also back exit-condition checks and preflight.

pub mod docker;
pub mod grep_codebase;
pub mod playwright_qa;
pub mod run_command;
pub mod wait_for_ci;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

pub use crate::core::types::ToolOutput;

pub use docker::DockerTool;
pub use grep_codebase::GrepCodebaseTool;
pub use playwright_qa::PlaywrightQaTool;
pub use run_command::RunCommandTool;
pub use wait_for_ci::WaitForCiTool;

/// Inputs for a tool run.
///
/// `workdir`, `timeout` and `output_limit_bytes` always apply; the remaining
/// fields are read only by the tools that need them.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Failure text that led to this run, when recovering.
    pub error_info: Option<String>,
    /// Shell command (`run_command`, direct `docker` mode).
    pub command: Option<String>,
    /// Exit code that counts as success for `command`.
    pub expect_exit_code: i32,
    /// Search pattern (`grep_codebase`).
    pub pattern: Option<String>,
    pub glob: Option<String>,
    pub max_results: usize,
    /// Page to check and what must hold there (`playwright_qa`).
    pub url: Option<String>,
    pub assertions: Vec<String>,
    pub model: Option<String>,
    /// Branch whose checks to poll (`wait_for_ci`); current branch when unset.
    pub branch: Option<String>,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    /// Docker preflight settings.
    pub socket_paths: Vec<String>,
    pub health_check: Option<String>,
    pub recovery_command: Option<String>,
}

impl ToolRequest {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
            error_info: None,
            command: None,
            expect_exit_code: 0,
            pattern: None,
            glob: None,
            max_results: 50,
            url: None,
            assertions: Vec::new(),
            model: None,
            branch: None,
            poll_interval: Duration::from_secs(30),
            max_wait: Duration::from_secs(600),
            socket_paths: Vec::new(),
            health_check: None,
            recovery_command: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// A remediation or verification action.
pub trait Tool {
    /// Unique registry key.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Pure predicate over failure text. Tools that only verify keep the
    /// default and are never picked for recovery.
    fn can_handle(&self, _error_info: &str) -> bool {
        false
    }

    /// Run the tool. Expected failures come back as a failed [`ToolOutput`];
    /// `Err` is for the tool being unable to run at all.
    fn run(&self, request: &ToolRequest) -> Result<ToolOutput>;
}

/// Case-insensitive containment of any keyword in `text`.
pub fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

/// Ordered set of tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A tool with the same name is replaced in place, keeping its
    /// position in the lookup order.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name() == name) {
            *slot = Box::new(tool);
            debug!(tool = name, "replaced tool");
        } else {
            self.tools.push(Box::new(tool));
            debug!(tool = name, "registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// First tool, in registration order, that claims `error_info`.
    pub fn find_recovery_tool(&self, error_info: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.can_handle(error_info))
            .map(|t| t.as_ref())
    }

    pub fn tools(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.iter().map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Registry with every built-in tool.
///
/// Order matters for recovery: narrow keyword sets come before `wait_for_ci`,
/// whose `ci` keyword matches many unrelated words.
pub fn default_registry(agent_command: &str) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(RunCommandTool);
    registry.register(GrepCodebaseTool::default());
    registry.register(PlaywrightQaTool::new(agent_command));
    registry.register(DockerTool::new());
    registry.register(WaitForCiTool::default());
    registry
}
