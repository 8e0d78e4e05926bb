//! Durable plugin registry: name → installation record.
//!
//! One JSON file (`registry.json`) owns the authoritative list of installed
//! extensions and their lifecycle state. Writes go through the atomic
//! save in `paths.rs`, so a crash leaves either the old or the new file,
//! never a partial one.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HostResult;
use crate::manifest::PluginManifest;
use crate::paths::{load_json_file, save_json_file, HostPaths};

/// Bumped when the on-disk shape changes.
pub const REGISTRY_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Lifecycle state machine:
/// `installed → activating → {active | error}`,
/// `active → deactivating → inactive`, `inactive → activating`.
/// `error` is retryable via a fresh activate call; nothing is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    #[default]
    Installed,
    Activating,
    Active,
    Deactivating,
    Inactive,
    Error,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One installed extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPlugin {
    pub name: String,
    pub version: String,
    pub manifest: PluginManifest,
    pub install_path: PathBuf,
    pub state: PluginState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub enabled: bool,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Installed from a local checkout; manifest may change on disk.
    #[serde(default)]
    pub dev: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

impl InstalledPlugin {
    pub fn new(manifest: PluginManifest, install_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            manifest,
            install_path,
            state: PluginState::Installed,
            last_error: None,
            enabled: true,
            installed_at: now,
            updated_at: now,
            dev: false,
            source_path: None,
        }
    }

    /// Absolute path of the JS entry point.
    pub fn entry_path(&self) -> PathBuf {
        self.install_path.join(&self.manifest.main)
    }
}

/// The registry file: schema version plus the name → record map.
/// Names are unique by construction (map keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRegistry {
    pub version: u32,
    #[serde(default)]
    pub plugins: HashMap<String, InstalledPlugin>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self { version: REGISTRY_VERSION, plugins: HashMap::new() }
    }
}

impl PluginRegistry {
    pub fn load(paths: &HostPaths) -> Self {
        load_json_file(&paths.registry_file())
    }

    pub fn save(&self, paths: &HostPaths) -> HostResult<()> {
        save_json_file(&paths.registry_file(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::normalize_manifest;
    use serde_json::json;

    fn manifest(name: &str) -> PluginManifest {
        normalize_manifest(&json!({ "name": name, "version": "1.0.0" })).unwrap()
    }

    #[test]
    fn new_record_starts_installed_and_enabled() {
        let rec = InstalledPlugin::new(manifest("wf"), PathBuf::from("/plugins/wf"));
        assert_eq!(rec.state, PluginState::Installed);
        assert!(rec.enabled);
        assert!(rec.last_error.is_none());
        assert_eq!(rec.entry_path(), PathBuf::from("/plugins/wf/main.js"));
    }

    #[test]
    fn registry_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path().to_path_buf());

        let mut registry = PluginRegistry::default();
        let mut rec = InstalledPlugin::new(manifest("wf"), PathBuf::from("/plugins/wf"));
        rec.state = PluginState::Error;
        rec.last_error = Some("activate() threw".into());
        registry.plugins.insert("wf".into(), rec);
        registry.save(&paths).unwrap();

        let loaded = PluginRegistry::load(&paths);
        assert_eq!(loaded.version, REGISTRY_VERSION);
        let rec = &loaded.plugins["wf"];
        assert_eq!(rec.state, PluginState::Error);
        assert_eq!(rec.last_error.as_deref(), Some("activate() threw"));
    }

    #[test]
    fn missing_registry_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path().join("fresh"));
        let loaded = PluginRegistry::load(&paths);
        assert!(loaded.plugins.is_empty());
        assert_eq!(loaded.version, REGISTRY_VERSION);
    }

    #[test]
    fn state_serializes_lowercase() {
        let v = serde_json::to_value(PluginState::Activating).unwrap();
        assert_eq!(v, json!("activating"));
    }

    #[test]
    fn entitlement_enforcement_survives_reload() {
        use crate::manifest::Capability;

        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path().to_path_buf());

        let m = normalize_manifest(&json!({
            "name": "wf",
            "version": "1.0.0",
            "entitlements": { "webview": { "create": true } }
        }))
        .unwrap();
        assert!(m.grants(Capability::WebviewCreate));

        let mut registry = PluginRegistry::default();
        registry
            .plugins
            .insert("wf".into(), InstalledPlugin::new(m, PathBuf::from("/p/wf")));
        registry.save(&paths).unwrap();

        let loaded = PluginRegistry::load(&paths);
        assert!(loaded.plugins["wf"].manifest.grants(Capability::WebviewCreate));
    }
}
