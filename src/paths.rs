//! Host directory layout and JSON persistence.
//!
//! All durable host state lives under a single root directory:
//! - `plugins/{name}/` — installed package files
//! - `registry.json` — the plugin registry
//! - `settings/{name}.json` — per-plugin settings
//! - `state/{name}.json` — per-plugin arbitrary state
//!
//! Also provides the path-safety helpers shared by the manifest validator
//! and the workspace filesystem API.

use std::path::{Component, Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{HostError, HostResult};

/// Resolved locations for one host instance. Built once from
/// `HostOptions::data_dir` and passed by reference — there is no global
/// config directory.
#[derive(Debug, Clone)]
pub struct HostPaths {
    root: PathBuf,
}

impl HostPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default root: `{platform_config_dir}/slatedock/`, falling back to
    /// `~/.slatedock/` when the platform dir is unavailable.
    pub fn default_root() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("slatedock"))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".slatedock")
            })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }

    pub fn plugin_dir(&self, name: &str) -> PathBuf {
        self.plugins_dir().join(name)
    }

    /// Sandboxed per-plugin data directory: `plugins/{name}/data/`.
    pub fn plugin_data_dir(&self, name: &str) -> PathBuf {
        self.plugin_dir(name).join("data")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    pub fn settings_dir(&self) -> PathBuf {
        self.root.join("settings")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }
}

// ---------------------------------------------------------------------------
// JSON persistence
// ---------------------------------------------------------------------------

/// Load a JSON file, returning `Default` if missing or corrupt.
/// Corrupt files are logged instead of silently resetting state.
pub(crate) fn load_json_file<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("[paths] Could not read {}: {e}", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("[paths] Corrupt file {}: {e}. Using defaults.", path.display());
            T::default()
        }
    }
}

/// Save a JSON file atomically (temp file + rename).
/// Sets 0600 permissions on Unix.
pub(crate) fn save_json_file<T: Serialize>(path: &Path, value: &T) -> HostResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| HostError::Io(format!("No parent directory for {}", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| HostError::io("Failed to create directory", e))?;

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| HostError::io("Failed to serialize", e))?;

    let temp = dir.join(format!(
        "{}.tmp.{}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        std::process::id()
    ));

    std::fs::write(&temp, &json).map_err(|e| HostError::io("Failed to write temp file", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&temp, perms)
            .map_err(|e| HostError::io("Failed to set permissions", e))?;
    }

    // Atomic rename: either the old file or the new file exists, never partial
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        HostError::io("Failed to commit file", e)
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Path safety
// ---------------------------------------------------------------------------

/// Returns true if a relative path attempts to escape its root via `..`,
/// absolute components, or other shenanigans.
pub(crate) fn is_path_escape(relative: &str) -> bool {
    let path = Path::new(relative);

    if path.is_absolute() {
        return true;
    }

    for component in path.components() {
        match component {
            Component::ParentDir => return true,
            Component::RootDir | Component::Prefix(_) => return true,
            _ => {}
        }
    }

    false
}

/// Resolve and validate that `raw` is within `root`.
/// Returns the canonicalized path on success.
pub(crate) fn validate_within(raw: &str, root: &Path) -> HostResult<PathBuf> {
    if raw.is_empty() {
        return Err(HostError::Validation("Path is empty".into()));
    }

    let path = PathBuf::from(raw);
    let joined = if path.is_absolute() {
        path
    } else {
        if is_path_escape(raw) {
            return Err(sandbox_violation());
        }
        root.join(path)
    };

    // Canonicalize resolves symlinks and .. components. Paths not on disk
    // yet (writes) canonicalize through their deepest existing ancestor.
    let canonical = match joined.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            let mut existing = joined.clone();
            let mut tail: Vec<std::ffi::OsString> = Vec::new();
            while !existing.exists() {
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    // A `..` or root tail that does not exist cannot be
                    // resolved safely
                    _ => {
                        return Err(HostError::Io(format!(
                            "Failed to resolve path: {}",
                            joined.display()
                        )))
                    }
                }
            }
            let mut resolved = existing
                .canonicalize()
                .map_err(|e| HostError::io("Failed to resolve path", e))?;
            for name in tail.iter().rev() {
                resolved.push(name);
            }
            resolved
        }
    };

    let canonical_root = root
        .canonicalize()
        .map_err(|e| HostError::io("Failed to resolve workspace root", e))?;

    if !canonical.starts_with(&canonical_root) {
        return Err(sandbox_violation());
    }

    Ok(canonical)
}

fn sandbox_violation() -> HostError {
    HostError::PermissionDenied {
        plugin: String::new(),
        capability: "filesystem".into(),
    }
}
