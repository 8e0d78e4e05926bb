//! Host error taxonomy.
//!
//! Every fallible host operation returns `HostError`. Extension-authored
//! hook failures arrive as `anyhow::Error` and are folded into
//! `HostError::Activation` (or logged and swallowed, for deactivation).

use thiserror::Error;

/// Errors surfaced by the plugin host.
#[derive(Debug, Error)]
pub enum HostError {
    /// An entitlement check failed. Names the capability the caller lacks
    /// so extension authors can self-diagnose.
    #[error("Permission denied: extension \"{plugin}\" lacks the \"{capability}\" entitlement")]
    PermissionDenied { plugin: String, capability: String },

    /// Unknown plugin, command, slate, or entry point.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation targets a plugin that is not currently active.
    #[error("Extension \"{0}\" is not active")]
    NotActive(String),

    /// A cross-boundary request or command invocation exceeded its budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Module load or the extension's `activate` hook failed.
    #[error("Failed to activate \"{plugin}\": {message}")]
    Activation { plugin: String, message: String },

    /// The manifest is missing a required field or is malformed.
    #[error("Invalid manifest: {0}")]
    Validation(String),

    /// A command ID is already registered by a different extension.
    #[error("Command \"{command}\" is already registered by \"{owner}\"")]
    AlreadyRegistered { command: String, owner: String },

    /// Filesystem or subprocess failure outside the categories above.
    #[error("{0}")]
    Io(String),
}

impl HostError {
    /// Shorthand used by the persistence and subprocess helpers.
    pub(crate) fn io(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Io(format!("{context}: {err}"))
    }
}

pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_names_the_capability() {
        let err = HostError::PermissionDenied {
            plugin: "wf".into(),
            capability: "process.spawn".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("process.spawn"));
        assert!(msg.contains("wf"));
    }

    #[test]
    fn already_registered_names_the_owner() {
        let err = HostError::AlreadyRegistered {
            command: "wf.sync".into(),
            owner: "wf".into(),
        };
        assert!(err.to_string().contains("wf.sync"));
    }
}
