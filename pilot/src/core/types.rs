//! Shared deterministic types for the control plane.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How an agent invocation ended.
///
/// The engine treats every non-success class the same way (an `Error` event),
/// but each is logged distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success,
    Failed { exit_code: Option<i32> },
    NotFound,
    TimedOut { after_secs: u64 },
}

impl AgentOutcome {
    pub fn succeeded(self) -> bool {
        self == AgentOutcome::Success
    }
}

impl fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentOutcome::Success => write!(f, "success"),
            AgentOutcome::Failed {
                exit_code: Some(code),
            } => write!(f, "exit code {code}"),
            AgentOutcome::Failed { exit_code: None } => write!(f, "terminated by signal"),
            AgentOutcome::NotFound => write!(f, "agent executable not found"),
            AgentOutcome::TimedOut { after_secs } => write!(f, "timed out after {after_secs}s"),
        }
    }
}

/// One entry of the append-only session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Agent-side session id, when the agent reported one.
    pub session_id: Option<String>,
    /// Step the invocation worked on.
    pub step_id: String,
    pub outcome: AgentOutcome,
    pub summary: String,
    pub token_estimate: u64,
}

impl SessionRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome.succeeded()
    }
}

/// Result of a recovery or verification tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub message: String,
    /// Tool-specific details; the engine only logs them.
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// How a run that stopped in a resting state got there.
///
/// The state name alone cannot distinguish a verified finish from an operator
/// escape hatch, since both end in `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Exit conditions passed.
    Finished,
    /// Operator declined the plan at `SpecCreation`.
    Rejected,
    /// Operator aborted from `NeedsInput`.
    Aborted,
    /// Waiting in `NeedsInput`; resume required.
    Blocked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_descriptions_are_distinct() {
        let all = [
            AgentOutcome::Failed { exit_code: Some(2) }.to_string(),
            AgentOutcome::Failed { exit_code: None }.to_string(),
            AgentOutcome::NotFound.to_string(),
            AgentOutcome::TimedOut { after_secs: 5 }.to_string(),
        ];
        assert_eq!(all[0], "exit code 2");
        assert_eq!(all[2], "agent executable not found");
        assert_eq!(all[3], "timed out after 5s");
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn session_record_round_trips_through_json() {
        let record = SessionRecord {
            session_id: Some("abc".to_string()),
            step_id: "s1".to_string(),
            outcome: AgentOutcome::TimedOut { after_secs: 600 },
            summary: "partial".to_string(),
            token_estimate: 42,
        };
        let json = serde_json::to_string(&record).expect("serialize");
        let back: SessionRecord = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, record);
        assert!(!back.succeeded());
    }
}
