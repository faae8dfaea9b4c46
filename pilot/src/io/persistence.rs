//! Session-scoped state storage.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/.active                  id of the active session, or empty
//! <root>/<session-id>/state.json  PersistedState for that session
//! ```
//!
//! Session ids start with a `YYYYMMDD_HHMMSS` timestamp, so lexicographic order
//! is chronological. Every write is an atomic replace.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::states::State;
use crate::core::text::slugify;
use crate::core::types::SessionRecord;

const ACTIVE_FILE: &str = ".active";
const STATE_FILE: &str = "state.json";
const SLUG_MAX_LEN: usize = 30;

/// Durable projection of the run context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedState {
    pub session_id: String,
    pub state: State,
    /// Spec file the run was started from (empty if the spec was built in memory).
    pub spec_path: String,
    pub step_index: usize,
    pub retry_count: u32,
    pub session_history: Vec<SessionRecord>,
    pub continuation_context: String,
    #[serde(default)]
    pub last_error: String,
    /// Primary working directory the run used, when it differs from the
    /// spec file's (e.g. a git worktree).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub completed: bool,
}

impl PersistedState {
    /// State a resumed run should re-enter.
    pub fn resume_state(&self) -> State {
        if self.state.is_transient() {
            State::Executing
        } else {
            self.state
        }
    }
}

/// Locator for one storage root of sessions.
///
/// All persistence goes through this value; nothing else writes the pointer
/// file or state files. It does not lock the root: two controllers sharing a
/// root must coordinate externally.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub fn state_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(STATE_FILE)
    }

    fn active_path(&self) -> PathBuf {
        self.root.join(ACTIVE_FILE)
    }

    /// Allocate a new session directory for `goal` and mark it active.
    pub fn create_session(&self, goal: &str) -> Result<String> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create sessions dir {}", self.root.display()))?;
        let base_id = format!(
            "{}_{}",
            Local::now().format("%Y%m%d_%H%M%S"),
            slugify(goal, SLUG_MAX_LEN, "session")
        );

        let mut session_id = base_id.clone();
        let mut suffix = 1u32;
        loop {
            // `create_dir` fails on an existing directory, so a racing creator
            // can never be overwritten.
            match fs::create_dir(self.session_dir(&session_id)) {
                Ok(()) => break,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    session_id = format!("{base_id}-{suffix:03}");
                    suffix += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("create session dir {}", self.session_dir(&session_id).display())
                    });
                }
            }
        }

        self.set_active(&session_id)?;
        info!(session_id = %session_id, "created session");
        Ok(session_id)
    }

    /// Atomically write `state` to its session's state file.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        if state.session_id.is_empty() {
            return Err(anyhow!("persisted state is missing a session id"));
        }
        let path = self.state_path(&state.session_id);
        debug!(session_id = %state.session_id, state = %state.state, step_index = state.step_index, "saving session state");
        let mut buf = serde_json::to_string_pretty(state).context("serialize session state")?;
        buf.push('\n');
        super::write_atomic(&path, &buf)
    }

    /// Load a session by id, or `None` if it has no state file.
    pub fn load(&self, session_id: &str) -> Result<Option<PersistedState>> {
        let path = self.state_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let state = serde_json::from_str(&contents)
            .with_context(|| format!("parse session state {}", path.display()))?;
        Ok(Some(state))
    }

    /// Id in the active pointer. Missing or empty pointer means no active session.
    pub fn active_session_id(&self) -> Result<Option<String>> {
        let path = self.active_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let id = contents.trim();
        if id.is_empty() {
            Ok(None)
        } else {
            Ok(Some(id.to_string()))
        }
    }

    pub fn load_active(&self) -> Result<Option<PersistedState>> {
        match self.active_session_id()? {
            Some(id) => self.load(&id),
            None => Ok(None),
        }
    }

    /// Mark the active session completed and clear the pointer.
    ///
    /// Does nothing when there is no active session with saved state.
    pub fn complete(&self) -> Result<()> {
        let Some(mut state) = self.load_active()? else {
            debug!("no active session to complete");
            return Ok(());
        };
        state.completed = true;
        self.save(&state)?;
        self.set_active("")?;
        info!(session_id = %state.session_id, "session completed");
        Ok(())
    }

    /// Delete the oldest completed sessions so at most `max_sessions` remain.
    ///
    /// In-progress sessions are never removed. Returns the deleted ids.
    pub fn cleanup(&self, max_sessions: usize) -> Result<Vec<String>> {
        let mut completed: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|state| state.completed)
            .map(|state| state.session_id)
            .collect();
        completed.sort();

        let keep_from = completed.len().saturating_sub(max_sessions);
        let doomed: Vec<String> = completed.drain(..keep_from).collect();
        for session_id in &doomed {
            let dir = self.session_dir(session_id);
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!(session_id = %session_id, err = %err, "failed to prune session");
            } else {
                debug!(session_id = %session_id, "pruned session");
            }
        }
        Ok(doomed)
    }

    /// Every stored session, sorted by id ascending.
    ///
    /// Directories without a readable state file are skipped.
    pub fn list(&self) -> Result<Vec<PersistedState>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in
            fs::read_dir(&self.root).with_context(|| format!("read {}", self.root.display()))?
        {
            let entry = entry.context("read sessions dir entry")?;
            if !entry.file_type().context("stat session entry")?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.load(&name) {
                Ok(Some(state)) => sessions.push(state),
                Ok(None) => {}
                Err(err) => warn!(session_id = %name, err = %format!("{err:#}"), "skipping unreadable session"),
            }
        }
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(sessions)
    }

    fn set_active(&self, session_id: &str) -> Result<()> {
        super::write_atomic(&self.active_path(), session_id)
    }
}
