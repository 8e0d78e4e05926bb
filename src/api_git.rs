//! Git API for extensions.
//!
//! Every git invocation goes through the `GitCmd` builder: it wraps the
//! `git` binary, pins the working directory to the workspace root,
//! captures output, and returns typed results with consistent error
//! handling. Read-only queries require `filesystem.read` (they only
//! expose workspace contents); arbitrary invocations require
//! `process.spawn`.

use std::path::Path;

use serde::Serialize;

use crate::api::ExtensionApi;
use crate::error::{HostError, HostResult};
use crate::manifest::Capability;

/// Successful output from a git subprocess.
#[derive(Debug, Clone, Serialize)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

/// One line of `git status --porcelain`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitStatusEntry {
    pub status: String,
    pub path: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and running a git subprocess.
pub(crate) struct GitCmd {
    cmd: tokio::process::Command,
}

pub(crate) fn git_cmd(repo: &Path) -> GitCmd {
    let mut cmd = tokio::process::Command::new("git");
    cmd.current_dir(repo)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    GitCmd { cmd }
}

impl GitCmd {
    pub(crate) fn args(mut self, args: &[&str]) -> Self {
        self.cmd.args(args);
        self
    }

    pub(crate) async fn run(mut self) -> HostResult<GitOutput> {
        let output = self
            .cmd
            .output()
            .await
            .map_err(|e| HostError::io("Failed to spawn git", e))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(if stderr.is_empty() {
                HostError::Io(format!("git exited with code {code}"))
            } else {
                HostError::Io(format!("git exited with code {code}: {stderr}"))
            });
        }

        Ok(GitOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

pub struct GitApi {
    pub(crate) api: ExtensionApi,
}

impl GitApi {
    fn repo(&self) -> &Path {
        &self.api.host.workspace_root
    }

    /// Parsed `git status --porcelain` for the workspace.
    pub async fn status(&self) -> HostResult<Vec<GitStatusEntry>> {
        self.api.check(Capability::FilesystemRead)?;
        let out = git_cmd(self.repo())
            .args(&["status", "--porcelain"])
            .run()
            .await?;
        Ok(parse_porcelain(&out.stdout))
    }

    /// Current branch name, or `HEAD` when detached.
    pub async fn current_branch(&self) -> HostResult<String> {
        self.api.check(Capability::FilesystemRead)?;
        let out = git_cmd(self.repo())
            .args(&["rev-parse", "--abbrev-ref", "HEAD"])
            .run()
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    /// `git log --oneline -n`.
    pub async fn recent_commits(&self, count: usize) -> HostResult<Vec<String>> {
        self.api.check(Capability::FilesystemRead)?;
        let count_arg = count.to_string();
        let out = git_cmd(self.repo())
            .args(&["log", "--oneline", "-n", &count_arg])
            .run()
            .await?;
        Ok(out.stdout.lines().map(|l| l.to_string()).collect())
    }

    /// Run an arbitrary git subcommand. Mutating power, so gated on
    /// `process.spawn` rather than a read grant.
    pub async fn run(&self, args: &[&str]) -> HostResult<GitOutput> {
        self.api.check(Capability::ProcessSpawn)?;
        git_cmd(self.repo()).args(args).run().await
    }
}

/// Parse `git status --porcelain` output into entries.
fn parse_porcelain(stdout: &str) -> Vec<GitStatusEntry> {
    stdout
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| GitStatusEntry {
            status: line[..2].trim().to_string(),
            path: line[3..].to_string(),
        })
        .collect()
}
