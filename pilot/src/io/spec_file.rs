//! Loading spec files from disk.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::spec::{Spec, parse_spec};

/// Read, parse and validate a spec file.
///
/// Working directories (context and preflight) have a leading `~` expanded.
pub fn load_spec(path: &Path) -> Result<Spec> {
    if !path.exists() {
        return Err(anyhow!("spec file not found: {}", path.display()));
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut spec = parse_spec(&contents).with_context(|| format!("load {}", path.display()))?;
    for dir in &mut spec.context.working_directories {
        *dir = expand_home(dir);
    }
    for cmd in &mut spec.preflight.commands {
        if let Some(dir) = &cmd.working_directory {
            cmd.working_directory = Some(expand_home(dir));
        }
    }
    debug!(path = %path.display(), steps = spec.steps.len(), "spec loaded");
    Ok(spec)
}

/// Expand a leading `~` using `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
