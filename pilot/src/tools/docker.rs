//! Diagnose and restart unhealthy Docker containers.
//!
//! Two modes: with a `command` the tool runs it directly; otherwise it locates
//! a Docker socket, runs a health check and restarts what is unhealthy. No
//! socket or no `docker` binary means there is nothing to check, which counts
//! as success.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use super::run_command::MAX_MESSAGE_CHARS;
use super::{Tool, ToolOutput, ToolRequest, mentions_any};
use crate::core::text::{truncate_chars, truncate_middle};
use crate::io::process::{CommandOutput, RunOptions, is_not_found, run_command, shell_command};
use crate::io::spec_file::expand_home;

const KEYWORDS: &[&str] = &[
    "docker",
    "container",
    "unhealthy",
    "compose",
    "connection refused",
    "503",
    "502",
    "econnrefused",
];
const DEFAULT_SOCKET_PATHS: &[&str] = &["/var/run/docker.sock", "~/.docker/run/docker.sock"];

#[derive(Debug, Clone)]
pub struct DockerTool {
    /// Docker CLI executable.
    pub program: String,
    /// Sockets tried after the request's own paths, in order.
    pub fallback_sockets: Vec<String>,
}

impl DockerTool {
    /// Tool that falls back to `$DOCKER_HOST` and the usual socket locations.
    pub fn new() -> Self {
        let mut fallback_sockets = Vec::new();
        if let Ok(host) = env::var("DOCKER_HOST") {
            fallback_sockets.push(host);
        }
        fallback_sockets.extend(DEFAULT_SOCKET_PATHS.iter().map(|p| (*p).to_string()));
        Self {
            program: "docker".to_string(),
            fallback_sockets,
        }
    }

    /// First candidate that is a Unix socket.
    fn find_socket(&self, custom: &[String]) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        for raw in custom.iter().chain(&self.fallback_sockets) {
            let path = expand_home(Path::new(raw.trim_start_matches("unix://")));
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
        candidates.into_iter().find(|path| is_socket(path))
    }

    fn docker(&self, args: &[&str], request: &ToolRequest, socket: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(&request.workdir)
            .env("DOCKER_HOST", docker_host(socket));
        cmd
    }

    fn run_direct(&self, command: &str, request: &ToolRequest) -> Result<ToolOutput> {
        info!(command, workdir = %request.workdir.display(), "docker command");
        let output = run(shell_command(command, &request.workdir), request)?;
        if output.timed_out {
            return Ok(ToolOutput::fail(format!(
                "docker command timed out after {}s",
                request.timeout.as_secs()
            )));
        }
        let text = output.combined();
        let message = if text.trim().is_empty() {
            "(no output)".to_string()
        } else {
            truncate_middle(&text, MAX_MESSAGE_CHARS)
        };
        Ok(ToolOutput {
            success: output.success(),
            message,
            data: Some(json!({ "exit_code": output.exit_code() })),
        })
    }

    fn check_and_restart(&self, request: &ToolRequest) -> Result<ToolOutput> {
        let Some(socket) = self.find_socket(&request.socket_paths) else {
            return Ok(ToolOutput::ok("no Docker socket found, skipping"));
        };
        debug!(socket = %socket.display(), "found docker socket");

        if let Some(health_check) = &request.health_check {
            let mut cmd = shell_command(health_check, &request.workdir);
            cmd.env("DOCKER_HOST", docker_host(&socket));
            let output = run(cmd, request)?;
            if output.timed_out {
                return Ok(ToolOutput::fail(format!(
                    "health check timed out: {health_check}"
                )));
            }
            if output.success() {
                return Ok(ToolOutput::ok("health check passed"));
            }
            if let Some(recovery) = &request.recovery_command {
                return self.run_recovery(recovery, request, &socket);
            }
            return Ok(ToolOutput::fail(format!(
                "health check failed: {}",
                failure_text(&output)
            )));
        }

        let ps = self.docker(
            &["ps", "-a", "--format", "{{.Names}}\t{{.Status}}"],
            request,
            &socket,
        );
        let output = match run(ps, request) {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                return Ok(ToolOutput::ok("docker not found on PATH, skipping"));
            }
            Err(err) => return Err(err),
        };
        if output.timed_out {
            return Ok(ToolOutput::fail("docker ps timed out"));
        }
        if !output.success() {
            return Ok(ToolOutput::fail(format!(
                "docker ps failed: {}",
                output.stderr_lossy().trim()
            )));
        }

        let unhealthy = unhealthy_containers(&output.stdout_lossy());
        if unhealthy.is_empty() {
            return Ok(ToolOutput::ok("all containers healthy"));
        }
        if let Some(recovery) = &request.recovery_command {
            return self.run_recovery(recovery, request, &socket);
        }

        let mut restarted = Vec::new();
        let mut failed = Vec::new();
        for name in unhealthy {
            let cmd = self.docker(&["restart", &name], request, &socket);
            match run(cmd, request) {
                Ok(out) if out.success() => restarted.push(name),
                Ok(out) => {
                    warn!(container = %name, stderr = %out.stderr_lossy().trim(), "restart failed");
                    failed.push(name);
                }
                Err(err) => {
                    warn!(container = %name, err = %err, "restart failed");
                    failed.push(name);
                }
            }
        }

        if failed.is_empty() {
            Ok(ToolOutput::ok(format!(
                "restarted {} container(s): {}",
                restarted.len(),
                restarted.join(", ")
            ))
            .with_data(json!({ "restarted": restarted })))
        } else {
            Ok(ToolOutput::fail(format!(
                "restarted [{}], failed to restart [{}]",
                restarted.join(", "),
                failed.join(", ")
            ))
            .with_data(json!({ "restarted": restarted, "failed": failed })))
        }
    }

    fn run_recovery(&self, command: &str, request: &ToolRequest, socket: &Path) -> Result<ToolOutput> {
        info!(command, "running docker recovery command");
        let mut cmd = shell_command(command, &request.workdir);
        cmd.env("DOCKER_HOST", docker_host(socket));
        let output = run(cmd, request)?;
        if output.timed_out {
            return Ok(ToolOutput::fail(format!(
                "recovery command timed out: {command}"
            )));
        }
        if output.success() {
            let stdout = output.stdout_lossy();
            Ok(ToolOutput::ok(format!(
                "recovery command succeeded: {}",
                truncate_chars(stdout.trim(), 500)
            )))
        } else {
            Ok(ToolOutput::fail(format!(
                "recovery command failed: {}",
                failure_text(&output)
            )))
        }
    }
}

impl Default for DockerTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for DockerTool {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn description(&self) -> &'static str {
        "Check Docker container health and restart unhealthy/exited containers"
    }

    fn can_handle(&self, error_info: &str) -> bool {
        mentions_any(error_info, KEYWORDS)
    }

    fn run(&self, request: &ToolRequest) -> Result<ToolOutput> {
        match request.command.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(command) => self.run_direct(command, request),
            None => self.check_and_restart(request),
        }
    }
}

fn run(cmd: Command, request: &ToolRequest) -> Result<CommandOutput> {
    let options = RunOptions::new(request.timeout, request.output_limit_bytes);
    run_command(cmd, &options).context("run docker command")
}

fn docker_host(socket: &Path) -> String {
    format!("unix://{}", socket.display())
}

fn failure_text(output: &CommandOutput) -> String {
    let stderr = output.stderr_lossy();
    if stderr.trim().is_empty() {
        output.stdout_lossy().trim().to_string()
    } else {
        stderr.trim().to_string()
    }
}

/// Names of containers whose status is unhealthy or exited.
///
/// Input is `docker ps -a --format '{{.Names}}\t{{.Status}}'` output.
pub fn unhealthy_containers(ps_output: &str) -> Vec<String> {
    ps_output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter(|(_, status)| {
            let status = status.to_lowercase();
            status.contains("unhealthy") || status.starts_with("exited")
        })
        .map(|(name, _)| name.trim().to_string())
        .collect()
}

#[cfg(unix)]
fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path).is_ok_and(|meta| meta.file_type().is_socket())
}

#[cfg(not(unix))]
fn is_socket(_path: &Path) -> bool {
    false
}
