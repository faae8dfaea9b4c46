//! Controller configuration stored under `.pilot/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::context_tracker::ContextTracker;
use crate::core::spec::{DEFAULT_MAX_RETRIES, DEFAULT_MODEL};

pub const DEFAULT_CONFIG_PATH: &str = ".pilot/config.toml";

/// Controller configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PilotConfig {
    /// Agent context window, in tokens.
    pub context_window_tokens: u64,

    /// Usage percentage at which the agent is considered close to full.
    pub context_warn_pct: u32,

    /// Usage percentage at which the next step starts a fresh agent session.
    pub context_handoff_pct: u32,

    /// Root directory for session state. Relative paths resolve against the
    /// current directory.
    pub sessions_dir: PathBuf,

    /// Completed sessions to keep; older ones are pruned. `0` keeps none.
    pub max_sessions: usize,

    /// Wall-clock limit for one agent invocation.
    pub agent_timeout_secs: u64,

    /// Default wall-clock limit for tool subprocesses.
    pub tool_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Agent executable (`codex` by default).
    pub agent_command: String,

    /// Working directory written into new specs (comma-separated for several).
    pub working_directory: String,

    /// Model written into new specs.
    pub model: String,

    /// `max_retries` offered for new specs.
    pub max_retries: u32,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            context_window_tokens: 192_000,
            context_warn_pct: 80,
            context_handoff_pct: 90,
            sessions_dir: PathBuf::from(".pilot/sessions"),
            max_sessions: 10,
            agent_timeout_secs: 600,
            tool_timeout_secs: 300,
            output_limit_bytes: 100_000,
            agent_command: "codex".to_string(),
            working_directory: ".".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.context_window_tokens == 0 {
            return Err(anyhow!("context_window_tokens must be > 0"));
        }
        if self.context_warn_pct == 0 || self.context_warn_pct > 100 {
            return Err(anyhow!("context_warn_pct must be in 1..=100"));
        }
        if self.context_handoff_pct == 0 || self.context_handoff_pct > 100 {
            return Err(anyhow!("context_handoff_pct must be in 1..=100"));
        }
        if self.context_warn_pct > self.context_handoff_pct {
            return Err(anyhow!(
                "context_warn_pct must not exceed context_handoff_pct"
            ));
        }
        if self.sessions_dir.as_os_str().is_empty() {
            return Err(anyhow!("sessions_dir must not be empty"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(anyhow!("tool_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.agent_command.trim().is_empty() {
            return Err(anyhow!("agent_command must not be empty"));
        }
        if self.working_directory.trim().is_empty() {
            return Err(anyhow!("working_directory must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        Ok(())
    }

    pub fn context_tracker(&self) -> ContextTracker {
        ContextTracker::new(
            self.context_window_tokens,
            self.context_warn_pct,
            self.context_handoff_pct,
        )
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
