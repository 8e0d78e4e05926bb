//! CLI execution API for extensions.
//!
//! Provides a sandboxed way for extensions holding the `process.spawn`
//! entitlement to run allowlisted binaries and capture their stdout.
//! Constraints:
//! - only binaries on the host allowlist, resolved from trusted install
//!   directories (never PATH, which is symlink-attackable)
//! - working directory must be inside the workspace root
//! - 30-second timeout, 5 MB stdout cap
//! - stderr truncated to 256 bytes in error messages so a failing tool
//!   cannot leak secrets into extension-visible errors
//! - per-extension sliding-window rate limit

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::api::ExtensionApi;
use crate::error::{HostError, HostResult};
use crate::manifest::Capability;
use crate::paths::validate_within;

/// Maximum execution time for a CLI command (30 seconds).
const MAX_EXEC_TIMEOUT_SECS: u64 = 30;

/// Maximum stdout size (5 MB).
const MAX_STDOUT_BYTES: usize = 5 * 1024 * 1024;

/// Maximum stderr bytes to include in error messages.
const MAX_STDERR_BYTES: usize = 256;

/// Maximum exec calls per extension per minute.
const RATE_LIMIT_PER_MINUTE: usize = 60;

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Per-extension sliding-window rate limiter. Tracks timestamps of recent
/// calls and rejects when the count exceeds the limit within 60 seconds.
/// Host-owned: each host instance gets its own windows.
#[derive(Default)]
pub(crate) struct RateLimiter {
    windows: DashMap<String, Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Check and record a call for the given extension.
    pub(crate) fn check(&self, plugin: &str) -> HostResult<()> {
        let entry = self
            .windows
            .entry(plugin.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut timestamps = entry.lock();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        // Evict timestamps older than the window
        while timestamps.front().is_some_and(|t| now.duration_since(*t) > window) {
            timestamps.pop_front();
        }

        if timestamps.len() >= RATE_LIMIT_PER_MINUTE {
            return Err(HostError::Io(format!(
                "Extension \"{plugin}\" exceeded the shell rate limit ({RATE_LIMIT_PER_MINUTE} calls/minute)"
            )));
        }

        timestamps.push_back(now);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn reset(&self, plugin: &str) {
        self.windows.remove(plugin);
    }
}

// ---------------------------------------------------------------------------
// Binary resolution
// ---------------------------------------------------------------------------

/// Trusted directories where allowlisted binaries may live. Only binaries
/// found within these directories (after symlink resolution) may execute.
#[cfg(not(windows))]
fn trusted_dirs() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_default();
    vec![
        home.join(".cargo/bin"),
        home.join(".local/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
        home.join(".npm-global/bin"),
        home.join("go/bin"),
    ]
}

#[cfg(windows)]
fn trusted_dirs() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_default();
    vec![home.join(".cargo\\bin"), home.join(".local\\bin")]
}

/// Resolve a binary name to an absolute path using known install
/// locations only. After finding a candidate, canonicalizes and verifies
/// the real path is still within a trusted directory.
fn resolve_binary(name: &str) -> Option<PathBuf> {
    let ext = if cfg!(windows) { ".exe" } else { "" };

    for dir in &trusted_dirs() {
        let candidate = dir.join(format!("{name}{ext}"));
        if !candidate.exists() {
            continue;
        }
        let canonical = match candidate.canonicalize() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if is_in_trusted_dir(&canonical) {
            return Some(canonical);
        }
    }

    None
}

/// Returns true if `path` resides within one of the trusted directories.
fn is_in_trusted_dir(path: &Path) -> bool {
    trusted_dirs().iter().any(|dir| {
        dir.canonicalize()
            .map(|d| path.starts_with(&d))
            .unwrap_or(false)
    })
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

/// Result of one shell execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub stdout: String,
    pub duration_ms: u64,
}

pub struct ShellApi {
    pub(crate) api: ExtensionApi,
}

impl ShellApi {
    /// Execute an allowlisted binary and return its stdout.
    pub async fn exec(
        &self,
        binary: &str,
        args: &[String],
        cwd: Option<&str>,
    ) -> HostResult<ExecOutput> {
        self.api.check(Capability::ProcessSpawn)?;
        self.api.host.shell_limiter.check(&self.api.plugin)?;

        let allowlist = &self.api.host.shell_allowlist;
        if !allowlist.iter().any(|b| b == binary) {
            return Err(HostError::Io(format!(
                "Binary \"{binary}\" is not in the shell allowlist. Allowed: {}",
                allowlist.join(", ")
            )));
        }

        let binary_path = resolve_binary(binary)
            .ok_or_else(|| HostError::NotFound(format!("binary \"{binary}\"")))?;

        let resolved_cwd = match cwd {
            Some(dir) => Some(validate_within(dir, &self.api.host.workspace_root).map_err(
                |e| match e {
                    HostError::PermissionDenied { .. } => HostError::Io(
                        "Working directory must be within the workspace root".into(),
                    ),
                    other => other,
                },
            )?),
            None => None,
        };

        let mut cmd = tokio::process::Command::new(&binary_path);
        cmd.args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(ref dir) = resolved_cwd {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(MAX_EXEC_TIMEOUT_SECS),
            cmd.output(),
        )
        .await
        .map_err(|_| {
            HostError::Timeout(format!(
                "Command \"{binary}\" timed out after {MAX_EXEC_TIMEOUT_SECS}s"
            ))
        })?
        .map_err(|e| HostError::io(&format!("Failed to execute \"{binary}\""), e))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "[api_shell] plugin={} binary={} duration={}ms ok={}",
            self.api.plugin,
            binary,
            duration_ms,
            result.status.success()
        );

        if !result.status.success() {
            // Truncate stderr to prevent leaking secrets a CLI tool might emit
            let stderr_bytes = &result.stderr[..result.stderr.len().min(MAX_STDERR_BYTES)];
            let stderr = String::from_utf8_lossy(stderr_bytes);
            let code = result
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            return Err(HostError::Io(format!(
                "Command \"{binary}\" exited with code {code}: {}",
                stderr.trim()
            )));
        }

        if result.stdout.len() > MAX_STDOUT_BYTES {
            return Err(HostError::Io(format!(
                "Command output exceeds maximum size ({} bytes > {MAX_STDOUT_BYTES} bytes)",
                result.stdout.len()
            )));
        }

        let stdout = String::from_utf8(result.stdout)
            .map_err(|e| HostError::io("Command output is not valid UTF-8", e))?;

        Ok(ExecOutput { stdout, duration_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_binary_returns_none_for_nonexistent() {
        assert!(resolve_binary("nonexistent-binary-12345").is_none());
    }

    #[test]
    fn is_in_trusted_dir_rejects_temp() {
        let tmp = std::env::temp_dir().join("fake_binary");
        assert!(!is_in_trusted_dir(&tmp));
    }

    #[test]
    fn rate_limit_allows_under_threshold() {
        let limiter = RateLimiter::default();
        for _ in 0..5 {
            assert!(limiter.check("under").is_ok());
        }
    }

    #[test]
    fn rate_limit_rejects_over_threshold() {
        let limiter = RateLimiter::default();
        for _ in 0..RATE_LIMIT_PER_MINUTE {
            assert!(limiter.check("over").is_ok());
        }
        let result = limiter.check("over");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("rate limit"));
    }

    #[test]
    fn rate_limit_windows_are_per_plugin() {
        let limiter = RateLimiter::default();
        for _ in 0..RATE_LIMIT_PER_MINUTE {
            limiter.check("busy").unwrap();
        }
        assert!(limiter.check("busy").is_err());
        assert!(limiter.check("idle").is_ok());
        limiter.reset("busy");
        assert!(limiter.check("busy").is_ok());
    }

    #[test]
    fn stderr_truncation_boundary() {
        let long_stderr = "x".repeat(1000);
        let truncated = &long_stderr.as_bytes()[..long_stderr.len().min(MAX_STDERR_BYTES)];
        assert_eq!(truncated.len(), 256);
    }
}
