//! Git adapter for isolating a run in its own worktree.
//!
//! A small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::text::slugify;

pub const BRANCH_PREFIX: &str = "pilot/";
const BRANCH_SLUG_MAX_LEN: usize = 50;
const BASE_REF: &str = "origin/main";

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

/// A freshly created worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: String,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if the working directory is inside a git repository.
    pub fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--git-dir"])
            .is_ok_and(|out| out.status.success())
    }

    /// True if `rev` resolves to an object.
    pub fn rev_exists(&self, rev: &str) -> Result<bool> {
        let status = self.run(&["rev-parse", "--verify", "--quiet", rev])?.status;
        Ok(status.success())
    }

    /// Create a new worktree for `goal` off `origin/main`, next to the repo.
    ///
    /// The branch is `pilot/<slug>`, with `-2` .. `-9` appended when taken. The
    /// worktree lands at `<repo>--<branch-slug>`.
    #[instrument(skip_all)]
    pub fn setup_worktree(&self, goal: &str) -> Result<Worktree> {
        let primary = self
            .workdir
            .canonicalize()
            .with_context(|| format!("resolve {}", self.workdir.display()))?;
        let git = Git::new(&primary);

        match git.run_checked(&["fetch", "origin", "main"]) {
            Ok(_) => debug!("fetched origin main"),
            Err(err) => warn!(err = %err, "fetch failed, using local origin/main"),
        }
        if !git.rev_exists(BASE_REF)? {
            return Err(anyhow!(
                "{BASE_REF} not found (is this repo cloned from a remote?)"
            ));
        }

        let branch = git.free_branch_name(goal)?;
        let slug = branch.trim_start_matches(BRANCH_PREFIX);
        let mut path_name = primary
            .file_name()
            .ok_or_else(|| anyhow!("repo path has no file name {}", primary.display()))?
            .to_os_string();
        path_name.push(format!("--{slug}"));
        let path = primary.with_file_name(path_name);

        let path_arg = path.to_string_lossy();
        git.run_checked(&["worktree", "add", "-b", &branch, &path_arg, BASE_REF])?;
        info!(path = %path.display(), branch = %branch, "worktree created");
        Ok(Worktree { path, branch })
    }

    fn free_branch_name(&self, goal: &str) -> Result<String> {
        let base = branch_name(goal);
        if !self.rev_exists(&base)? {
            return Ok(base);
        }
        for suffix in 2..10 {
            let candidate = format!("{base}-{suffix}");
            if !self.rev_exists(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(anyhow!("all branch names {base}(-2..-9) are taken"))
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// `pilot/<slug of goal>`.
pub fn branch_name(goal: &str) -> String {
    format!(
        "{BRANCH_PREFIX}{}",
        slugify(goal, BRANCH_SLUG_MAX_LEN, "unnamed")
    )
}
