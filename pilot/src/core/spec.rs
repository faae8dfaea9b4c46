//! Declarative task specification: goal, ordered steps, exit conditions.
//!
//! Parsing is pure (YAML text in, [`Spec`] out). Reading the file and
//! expanding paths lives in [`crate::io::spec_file`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const SUPPORTED_VERSION: u32 = 1;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MODEL: &str = "gpt-5.3-codex";
pub const DEFAULT_PREFLIGHT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub version: u32,
    pub goal: String,
    pub steps: Vec<Step>,
    pub exit_conditions: Vec<ExitCondition>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub context: SpecContext,
    #[serde(default, skip_serializing_if = "Preflight::is_empty")]
    pub preflight: Preflight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    /// Prompt sent to the agent; the description is used when absent.
    #[serde(default, alias = "codex_prompt", skip_serializing_if = "Option::is_none")]
    pub agent_prompt: Option<String>,
}

impl Step {
    pub fn prompt(&self) -> &str {
        self.agent_prompt.as_deref().unwrap_or(&self.description)
    }
}

/// A check that must pass for the goal to count as achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitCondition {
    Command {
        command: String,
        #[serde(default)]
        expect_exit_code: i32,
    },
    Playwright {
        url: String,
        #[serde(default)]
        assertions: Vec<String>,
    },
}

impl ExitCondition {
    pub fn kind(&self) -> &'static str {
        match self {
            ExitCondition::Command { .. } => "command",
            ExitCondition::Playwright { .. } => "playwright",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecContext {
    /// First entry is the primary working directory.
    #[serde(
        rename = "working_directory",
        default = "default_working_directories",
        deserialize_with = "one_or_many"
    )]
    pub working_directories: Vec<PathBuf>,
    #[serde(default = "default_model")]
    pub model: String,
}

impl SpecContext {
    pub fn working_directory(&self) -> &Path {
        self.working_directories
            .first()
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("."))
    }

    /// Replace the primary working directory, keeping any others.
    pub fn set_working_directory(&mut self, dir: PathBuf) {
        match self.working_directories.first_mut() {
            Some(primary) => *primary = dir,
            None => self.working_directories.push(dir),
        }
    }
}

impl Default for SpecContext {
    fn default() -> Self {
        Self {
            working_directories: default_working_directories(),
            model: default_model(),
        }
    }
}

/// Checks run at the start of every verification phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preflight {
    pub docker: DockerPreflight,
    pub commands: Vec<PreflightCommand>,
}

impl Preflight {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerPreflight {
    pub enabled: bool,
    pub socket_paths: Vec<String>,
    pub health_check: Option<String>,
    pub recovery_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightCommand {
    pub command: String,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default = "default_preflight_timeout", alias = "timeout")]
    pub timeout_secs: u64,
    /// A failing fatal command fails the whole verification phase.
    #[serde(default)]
    pub fail_on_error: bool,
}

impl Spec {
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.id.as_str()).collect()
    }

    /// Semantic checks serde cannot express. Returns every violation found.
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.version != SUPPORTED_VERSION {
            errors.push(format!(
                "unsupported spec version: {} (expected {SUPPORTED_VERSION})",
                self.version
            ));
        }
        if self.goal.trim().is_empty() {
            errors.push("'goal' must not be empty".to_string());
        }

        if self.steps.is_empty() {
            errors.push("'steps' must be a non-empty list".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                errors.push(format!("step {i} has an empty 'id'"));
            } else if !seen.insert(step.id.as_str()) {
                errors.push(format!("duplicate step id: {}", step.id));
            }
            if step.description.trim().is_empty() {
                errors.push(format!("step {i} has an empty 'description'"));
            }
        }

        if self.exit_conditions.is_empty() {
            errors.push("'exit_conditions' must be a non-empty list".to_string());
        }
        for (i, condition) in self.exit_conditions.iter().enumerate() {
            match condition {
                ExitCondition::Command { command, .. } => {
                    if command.trim().is_empty() {
                        errors.push(format!("exit condition {i}: 'command' must not be empty"));
                    }
                }
                ExitCondition::Playwright { url, assertions } => {
                    if url.trim().is_empty() {
                        errors.push(format!("exit condition {i}: 'playwright' requires 'url'"));
                    }
                    if assertions.is_empty() {
                        errors.push(format!(
                            "exit condition {i}: 'playwright' requires non-empty 'assertions'"
                        ));
                    }
                }
            }
        }

        if self.context.working_directories.is_empty() {
            errors.push("'context.working_directory' must not be empty".to_string());
        }
        for (i, cmd) in self.preflight.commands.iter().enumerate() {
            if cmd.command.trim().is_empty() {
                errors.push(format!("preflight command {i}: 'command' must not be empty"));
            }
        }
        errors
    }
}

/// Parse and validate a spec from YAML text.
pub fn parse_spec(text: &str) -> Result<Spec> {
    let spec: Spec = serde_yaml::from_str(text).context("parse spec yaml")?;
    let errors = spec.violations();
    if !errors.is_empty() {
        bail!("spec validation failed:\n- {}", errors.join("\n- "));
    }
    Ok(spec)
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_working_directories() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_preflight_timeout() -> u64 {
    DEFAULT_PREFLIGHT_TIMEOUT_SECS
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}
