//! The plugin host: lifecycle orchestration and shared state.
//!
//! `PluginHost` owns the registry, every registration table, and the
//! persistence handles; everything is passed by reference into operations
//! so tests (and multi-window apps) can run several isolated hosts side by
//! side. The embedding application supplies the package resolver, module
//! loader, and UI/editor/terminal surfaces through the collaborator traits
//! below.
//!
//! Lifecycle invariants:
//! - per-extension operations are serialized by a per-name async mutex, so
//!   concurrent install/update/activate calls for one name cannot race;
//! - activation failure never leaves partial state: registrations made by
//!   a failing `activate()` hook are swept before the error propagates;
//! - teardown on deactivation is exhaustive and unconditional — it runs
//!   whether or not the extension's `deactivate()` hook succeeded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use crate::api::{ExtensionApi, FileDecoration, RegistrationTables};
use crate::api_shell::RateLimiter;
use crate::commands::{CommandRouter, DEFAULT_COMMAND_TIMEOUT};
use crate::error::{HostError, HostResult};
use crate::events::EventBus;
use crate::host_log::{LogLevel, LogRingBuffer};
use crate::manifest::{normalize_manifest, Capability, PluginManifest};
use crate::paths::HostPaths;
use crate::registry::{InstalledPlugin, PluginRegistry, PluginState};
use crate::settings::{KvStore, SettingsStore};
use crate::slates::SlateCoordinator;

// ---------------------------------------------------------------------------
// Collaborator interfaces
// ---------------------------------------------------------------------------

/// Where an installation comes from: a local directory or a package
/// identifier the resolver knows how to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    Path(PathBuf),
    Package(String),
}

/// Resolves an install source to a readable package directory.
#[async_trait]
pub trait PackageResolver: Send + Sync {
    async fn resolve(&self, source: &InstallSource, version: Option<&str>) -> HostResult<PathBuf>;
}

/// A loaded extension module: the two lifecycle hooks, both optional in
/// the wire sense (the default `deactivate` succeeds without doing
/// anything).
#[async_trait]
pub trait PluginModule: Send + Sync {
    async fn activate(&self, api: ExtensionApi) -> anyhow::Result<()>;

    async fn deactivate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Loads a resolved entry point into a runnable module.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, plugin: &str, entry: &Path) -> HostResult<Arc<dyn PluginModule>>;
}

/// Notification and dialog surface of the embedding app.
#[async_trait]
pub trait UiHost: Send + Sync {
    fn notify(&self, plugin: &str, level: LogLevel, message: &str);
    async fn show_input(&self, plugin: &str, prompt: &str, placeholder: Option<&str>) -> Option<String>;
    async fn show_quick_pick(&self, plugin: &str, items: Vec<String>) -> Option<String>;
}

/// Editor surface of the embedding app.
#[async_trait]
pub trait EditorHost: Send + Sync {
    fn active_file(&self) -> Option<PathBuf>;
    async fn open_file(&self, path: &str) -> anyhow::Result<()>;
    async fn insert_text(&self, text: &str) -> anyhow::Result<()>;
}

/// Terminal surface of the embedding app.
#[async_trait]
pub trait TerminalHost: Send + Sync {
    async fn write(&self, text: &str) -> anyhow::Result<()>;
    async fn read_screen(&self) -> anyhow::Result<String>;
}

/// Default surfaces for headless hosts (tests, CLI tooling): notifications
/// go to the log, dialogs answer `None`, editor and terminal report that
/// no surface is attached.
pub struct HeadlessSurfaces;

#[async_trait]
impl UiHost for HeadlessSurfaces {
    fn notify(&self, plugin: &str, level: LogLevel, message: &str) {
        tracing::info!("[host] notification from \"{plugin}\" ({level:?}): {message}");
    }
    async fn show_input(&self, _plugin: &str, _prompt: &str, _placeholder: Option<&str>) -> Option<String> {
        None
    }
    async fn show_quick_pick(&self, _plugin: &str, _items: Vec<String>) -> Option<String> {
        None
    }
}

#[async_trait]
impl EditorHost for HeadlessSurfaces {
    fn active_file(&self) -> Option<PathBuf> {
        None
    }
    async fn open_file(&self, _path: &str) -> anyhow::Result<()> {
        anyhow::bail!("no editor surface attached")
    }
    async fn insert_text(&self, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!("no editor surface attached")
    }
}

#[async_trait]
impl TerminalHost for HeadlessSurfaces {
    async fn write(&self, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!("no terminal surface attached")
    }
    async fn read_screen(&self) -> anyhow::Result<String> {
        anyhow::bail!("no terminal surface attached")
    }
}

/// Resolver for hosts that only install from local directories. Package
/// identifiers fail with `NotFound`; an app with a remote catalog plugs in
/// its own resolver.
pub struct LocalPathResolver;

#[async_trait]
impl PackageResolver for LocalPathResolver {
    async fn resolve(&self, source: &InstallSource, _version: Option<&str>) -> HostResult<PathBuf> {
        match source {
            InstallSource::Path(path) => {
                if path.is_dir() {
                    Ok(path.clone())
                } else {
                    Err(HostError::NotFound(format!("package directory {}", path.display())))
                }
            }
            InstallSource::Package(id) => Err(HostError::NotFound(format!(
                "package \"{id}\" (no remote resolver configured)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Host construction
// ---------------------------------------------------------------------------

/// Everything a host needs from its embedder.
pub struct HostOptions {
    pub data_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub resolver: Arc<dyn PackageResolver>,
    pub loader: Arc<dyn ModuleLoader>,
    pub ui: Option<Arc<dyn UiHost>>,
    pub editor: Option<Arc<dyn EditorHost>>,
    pub terminal: Option<Arc<dyn TerminalHost>>,
    /// Binaries extensions may run through `shell.exec`.
    pub shell_allowlist: Vec<String>,
    pub command_timeout: Option<Duration>,
}

pub struct PluginHost {
    pub(crate) paths: HostPaths,
    pub(crate) workspace_root: PathBuf,
    pub(crate) registry: RwLock<PluginRegistry>,
    pub(crate) modules: DashMap<String, Arc<dyn PluginModule>>,
    pub(crate) commands: Arc<CommandRouter>,
    pub(crate) slates: Arc<SlateCoordinator>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) state: Arc<KvStore>,
    pub(crate) log: Arc<LogRingBuffer>,
    pub(crate) registrations: RegistrationTables,
    pub(crate) resolver: Arc<dyn PackageResolver>,
    pub(crate) loader: Arc<dyn ModuleLoader>,
    pub(crate) ui: Arc<dyn UiHost>,
    pub(crate) editor: Arc<dyn EditorHost>,
    pub(crate) terminal: Arc<dyn TerminalHost>,
    pub(crate) configuration: RwLock<HashMap<String, Value>>,
    pub(crate) shell_limiter: RateLimiter,
    pub(crate) shell_allowlist: Vec<String>,
    /// Per-extension operation locks; lifecycle transitions for one name
    /// never interleave.
    op_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    dev_watcher: Mutex<Option<RecommendedWatcher>>,
}

impl PluginHost {
    /// Build a host over a data directory: loads the registry, normalizes
    /// states left over from a previous run (nothing is running yet), and
    /// eagerly loads every registered extension's settings and state.
    pub fn new(options: HostOptions) -> Arc<Self> {
        let paths = HostPaths::new(options.data_dir);
        let mut registry = PluginRegistry::load(&paths);

        // A previous session may have crashed mid-transition; every
        // runtime state collapses to inactive at boot.
        let mut dirty = false;
        for record in registry.plugins.values_mut() {
            if matches!(
                record.state,
                PluginState::Active | PluginState::Activating | PluginState::Deactivating
            ) {
                record.state = PluginState::Inactive;
                dirty = true;
            }
        }
        if dirty {
            if let Err(e) = registry.save(&paths) {
                tracing::warn!("[host] Failed to persist state normalization: {e}");
            }
        }

        let settings = Arc::new(SettingsStore::new(paths.settings_dir()));
        let state = Arc::new(KvStore::new(paths.state_dir()));
        settings.load_all(registry.plugins.keys().map(|k| k.as_str()));
        state.load_all(registry.plugins.keys().map(|k| k.as_str()));

        let slates = Arc::new(SlateCoordinator::new(Arc::clone(&settings), Arc::clone(&state)));
        let timeout = options.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);

        Arc::new(Self {
            paths,
            workspace_root: options.workspace_root,
            registry: RwLock::new(registry),
            modules: DashMap::new(),
            commands: Arc::new(CommandRouter::new(timeout)),
            slates,
            events: Arc::new(EventBus::new()),
            settings,
            state,
            log: Arc::new(LogRingBuffer::default()),
            registrations: RegistrationTables::default(),
            resolver: options.resolver,
            loader: options.loader,
            ui: options.ui.unwrap_or_else(|| Arc::new(HeadlessSurfaces)),
            editor: options.editor.unwrap_or_else(|| Arc::new(HeadlessSurfaces)),
            terminal: options.terminal.unwrap_or_else(|| Arc::new(HeadlessSurfaces)),
            configuration: RwLock::new(HashMap::new()),
            shell_limiter: RateLimiter::default(),
            shell_allowlist: options.shell_allowlist,
            op_locks: DashMap::new(),
            dev_watcher: Mutex::new(None),
        })
    }

    fn op_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.op_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_plugin(&self, name: &str) -> Option<InstalledPlugin> {
        self.registry.read().plugins.get(name).cloned()
    }

    pub fn list_plugins(&self) -> Vec<InstalledPlugin> {
        let mut plugins: Vec<_> = self.registry.read().plugins.values().cloned().collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.registry
            .read()
            .plugins
            .get(name)
            .is_some_and(|r| r.state == PluginState::Active)
    }

    pub(crate) fn manifest_for(&self, name: &str) -> HostResult<PluginManifest> {
        self.registry
            .read()
            .plugins
            .get(name)
            .map(|r| r.manifest.clone())
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))
    }

    /// Call-time entitlement check against the *current* manifest.
    pub(crate) fn check_capability(&self, plugin: &str, cap: Capability) -> HostResult<()> {
        let manifest = self.manifest_for(plugin)?;
        if manifest.grants(cap) {
            Ok(())
        } else {
            Err(HostError::PermissionDenied {
                plugin: plugin.to_string(),
                capability: cap.as_str().to_string(),
            })
        }
    }

    pub fn slates(&self) -> &Arc<SlateCoordinator> {
        &self.slates
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn log(&self) -> &Arc<LogRingBuffer> {
        &self.log
    }

    pub fn registrations(&self) -> &RegistrationTables {
        &self.registrations
    }

    /// Execute a registered command by fully-qualified ID.
    pub async fn execute_command(&self, id: &str, args: Vec<Value>) -> HostResult<Value> {
        self.commands
            .execute(id, args, |owner| self.is_active(owner))
            .await
    }

    /// Aggregate file decorations from every registered provider.
    pub fn decorations_for(&self, path: &str) -> Vec<FileDecoration> {
        self.registrations
            .decorations
            .iter()
            .filter_map(|entry| (entry.value().provider)(path))
            .collect()
    }

    /// Replace one host configuration value and notify subscribed
    /// extensions through the event bus.
    pub fn set_configuration(&self, key: &str, value: Value) {
        self.configuration.write().insert(key.to_string(), value.clone());
        self.events
            .emit("configuration.changed", &json!({ "key": key, "value": value }));
    }

    // -----------------------------------------------------------------------
    // Lifecycle: install / uninstall / update
    // -----------------------------------------------------------------------

    /// Install an extension. Resolves the package, normalizes its
    /// manifest, records it, and — when enabled — activates it. An
    /// activation failure is recorded on the record but does not fail the
    /// install.
    pub async fn install(
        self: &Arc<Self>,
        source: InstallSource,
        version: Option<&str>,
    ) -> HostResult<InstalledPlugin> {
        let package_dir = self.resolver.resolve(&source, version).await?;
        let manifest = read_manifest(&package_dir)?;
        let name = manifest.name.clone();

        let lock = self.op_lock(&name);
        let _guard = lock.lock().await;

        let install_path = self.paths.plugin_dir(&name);
        if package_dir != install_path {
            copy_dir_recursive(&package_dir, &install_path)?;
        }

        let mut record = InstalledPlugin::new(manifest, install_path);
        if let InstallSource::Path(path) = &source {
            record.source_path = Some(path.clone());
        }
        let enabled = record.enabled;

        {
            let mut registry = self.registry.write();
            registry.plugins.insert(name.clone(), record);
            registry.save(&self.paths)?;
        }
        self.settings.load_all(std::iter::once(name.as_str()));
        self.state.load_all(std::iter::once(name.as_str()));
        tracing::info!("[host] Installed \"{name}\"");

        if enabled {
            if let Err(e) = self.activate_inner(&name).await {
                tracing::warn!("[host] Activation after install failed for \"{name}\": {e}");
            }
        }

        self.get_plugin(&name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))
    }

    /// Install a local checkout in place: no copy, marked `dev`, manifest
    /// re-read on change by the dev watcher.
    pub async fn install_dev(self: &Arc<Self>, path: &Path) -> HostResult<InstalledPlugin> {
        let manifest = read_manifest(path)?;
        let name = manifest.name.clone();

        let lock = self.op_lock(&name);
        let _guard = lock.lock().await;

        let mut record = InstalledPlugin::new(manifest, path.to_path_buf());
        record.dev = true;
        record.source_path = Some(path.to_path_buf());
        let enabled = record.enabled;

        {
            let mut registry = self.registry.write();
            registry.plugins.insert(name.clone(), record);
            registry.save(&self.paths)?;
        }
        self.settings.load_all(std::iter::once(name.as_str()));
        self.state.load_all(std::iter::once(name.as_str()));
        tracing::info!("[host] Installed \"{name}\" (dev, in place)");

        if enabled {
            if let Err(e) = self.activate_inner(&name).await {
                tracing::warn!("[host] Activation after install failed for \"{name}\": {e}");
            }
        }

        self.get_plugin(&name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))
    }

    /// Uninstall: deactivate if running, remove package files (dev
    /// checkouts are left alone — they belong to the developer), drop the
    /// registry entry. Settings and state files survive for a reinstall.
    pub async fn uninstall(self: &Arc<Self>, name: &str) -> HostResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        let record = self
            .get_plugin(name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))?;

        if record.state == PluginState::Active {
            self.deactivate_inner(name).await?;
        }

        if !record.dev && record.install_path.exists() {
            std::fs::remove_dir_all(&record.install_path)
                .map_err(|e| HostError::io("Failed to remove package files", e))?;
        }

        {
            let mut registry = self.registry.write();
            registry.plugins.remove(name);
            registry.save(&self.paths)?;
        }
        tracing::info!("[host] Uninstalled \"{name}\"");
        Ok(())
    }

    /// Update: deactivate if running, re-resolve and re-normalize (the new
    /// manifest's entitlements are authoritative), then re-activate when
    /// it was active before. Re-activation failure is recorded on the
    /// record and propagated.
    pub async fn update(self: &Arc<Self>, name: &str) -> HostResult<InstalledPlugin> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        let record = self
            .get_plugin(name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))?;
        let was_active = record.state == PluginState::Active;

        if was_active {
            self.deactivate_inner(name).await?;
        }

        let package_dir = if record.dev {
            record.source_path.clone().unwrap_or_else(|| record.install_path.clone())
        } else {
            self.resolver
                .resolve(&InstallSource::Package(name.to_string()), None)
                .await?
        };

        let manifest = read_manifest(&package_dir)?;
        if manifest.name != name {
            return Err(HostError::Validation(format!(
                "updated manifest renames \"{name}\" to \"{}\"",
                manifest.name
            )));
        }
        if !record.dev && package_dir != record.install_path {
            copy_dir_recursive(&package_dir, &record.install_path)?;
        }

        {
            let mut registry = self.registry.write();
            if let Some(rec) = registry.plugins.get_mut(name) {
                rec.version = manifest.version.clone();
                rec.manifest = manifest;
                rec.updated_at = Utc::now();
            }
            registry.save(&self.paths)?;
        }
        tracing::info!("[host] Updated \"{name}\"");

        if was_active {
            self.activate_inner(name).await?;
        }

        self.get_plugin(name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))
    }

    // -----------------------------------------------------------------------
    // Lifecycle: activate / deactivate
    // -----------------------------------------------------------------------

    pub async fn activate(self: &Arc<Self>, name: &str) -> HostResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        self.activate_inner(name).await
    }

    /// Core activation; assumes the per-name lock is held.
    async fn activate_inner(self: &Arc<Self>, name: &str) -> HostResult<()> {
        let record = self
            .get_plugin(name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))?;

        if !record.enabled {
            tracing::info!("[host] \"{name}\" is disabled; skipping activation");
            return Ok(());
        }
        if record.state == PluginState::Active {
            tracing::info!("[host] \"{name}\" already active");
            return Ok(());
        }

        self.set_state(name, PluginState::Activating, None)?;

        let entry = record.entry_path();
        if !entry.exists() {
            let message = format!("entry point {} not found", entry.display());
            self.set_state(name, PluginState::Error, Some(message))?;
            return Err(HostError::NotFound(format!("entry point for \"{name}\"")));
        }

        let module = match self.loader.load(name, &entry).await {
            Ok(module) => module,
            Err(e) => {
                let message = e.to_string();
                self.set_state(name, PluginState::Error, Some(message.clone()))?;
                return Err(HostError::Activation { plugin: name.to_string(), message });
            }
        };

        let api = ExtensionApi::new(Arc::clone(self), name);
        match module.activate(api).await {
            Ok(()) => {
                self.modules.insert(name.to_string(), module);
                self.set_state(name, PluginState::Active, None)?;
                tracing::info!("[host] Activated \"{name}\"");
                Ok(())
            }
            Err(e) => {
                // No partial activation: sweep anything the failed hook
                // managed to register before it threw.
                self.teardown_registrations(name);
                let message = e.to_string();
                self.set_state(name, PluginState::Error, Some(message.clone()))?;
                Err(HostError::Activation { plugin: name.to_string(), message })
            }
        }
    }

    pub async fn deactivate(self: &Arc<Self>, name: &str) -> HostResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        self.deactivate_inner(name).await
    }

    /// Core deactivation; assumes the per-name lock is held.
    async fn deactivate_inner(&self, name: &str) -> HostResult<()> {
        let record = self
            .get_plugin(name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))?;

        if record.state != PluginState::Active {
            tracing::debug!("[host] \"{name}\" is not active; nothing to deactivate");
            return Ok(());
        }

        self.set_state(name, PluginState::Deactivating, None)?;

        if let Some(module) = self.modules.get(name).map(|m| Arc::clone(m.value())) {
            if let Err(e) = module.deactivate().await {
                tracing::warn!("[host] \"{name}\" deactivate hook failed: {e}");
            }
        }

        // Exhaustive teardown, independent of the hook's outcome
        self.teardown_registrations(name);
        self.modules.remove(name);
        self.set_state(name, PluginState::Inactive, None)?;
        tracing::info!("[host] Deactivated \"{name}\"");
        Ok(())
    }

    /// Drop every registration an extension owns, across every table.
    fn teardown_registrations(&self, name: &str) {
        self.commands.remove_owned_by(name);
        self.slates.remove_owned_by(name);
        self.events.remove_owned_by(name);
        self.settings.remove_owned_by(name);
        self.registrations.remove_owned_by(name);
    }

    fn set_state(&self, name: &str, state: PluginState, error: Option<String>) -> HostResult<()> {
        let mut registry = self.registry.write();
        let Some(record) = registry.plugins.get_mut(name) else {
            return Err(HostError::NotFound(format!("extension \"{name}\"")));
        };
        record.state = state;
        record.last_error = error;
        registry.save(&self.paths)
    }

    // -----------------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------------

    /// Activate every enabled, startup-activated extension, strictly
    /// sequentially. One extension's failure never stops the rest.
    pub async fn activate_all_enabled(self: &Arc<Self>) {
        let mut names: Vec<String> = {
            let registry = self.registry.read();
            registry
                .plugins
                .values()
                .filter(|r| r.enabled && r.manifest.activates_always())
                .map(|r| r.name.clone())
                .collect()
        };
        names.sort();

        for name in names {
            if let Err(e) = self.activate(&name).await {
                tracing::error!("[host] Startup activation of \"{name}\" failed: {e}");
            }
        }
    }

    /// Deactivate every running extension, strictly sequentially.
    pub async fn deactivate_all(self: &Arc<Self>) {
        let mut names: Vec<String> = {
            let registry = self.registry.read();
            registry
                .plugins
                .values()
                .filter(|r| r.state == PluginState::Active)
                .map(|r| r.name.clone())
                .collect()
        };
        names.sort();

        for name in names {
            if let Err(e) = self.deactivate(&name).await {
                tracing::error!("[host] Deactivation of \"{name}\" failed: {e}");
            }
        }
    }

    /// Enable or disable an extension. Disabling a running extension
    /// deactivates it first; enabling activates immediately (activation
    /// failure is recorded, not propagated, mirroring install).
    pub async fn set_enabled(self: &Arc<Self>, name: &str, enabled: bool) -> HostResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        let record = self
            .get_plugin(name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))?;
        if record.enabled == enabled {
            return Ok(());
        }

        if !enabled && record.state == PluginState::Active {
            self.deactivate_inner(name).await?;
        }

        {
            let mut registry = self.registry.write();
            if let Some(rec) = registry.plugins.get_mut(name) {
                rec.enabled = enabled;
            }
            registry.save(&self.paths)?;
        }

        if enabled {
            if let Err(e) = self.activate_inner(name).await {
                tracing::warn!("[host] Activation after enable failed for \"{name}\": {e}");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Local-dev support
    // -----------------------------------------------------------------------

    /// Re-read a dev extension's manifest from its checkout. Entitlement
    /// checks read the current manifest at call time, so new grants apply
    /// without re-activation.
    pub fn reload_manifest(&self, name: &str) -> HostResult<()> {
        let record = self
            .get_plugin(name)
            .ok_or_else(|| HostError::NotFound(format!("extension \"{name}\"")))?;
        let dir = record.source_path.unwrap_or(record.install_path);
        let manifest = read_manifest(&dir)?;
        if manifest.name != name {
            return Err(HostError::Validation(format!(
                "manifest on disk renames \"{name}\" to \"{}\"",
                manifest.name
            )));
        }

        let mut registry = self.registry.write();
        if let Some(rec) = registry.plugins.get_mut(name) {
            rec.version = manifest.version.clone();
            rec.manifest = manifest;
        }
        registry.save(&self.paths)?;
        tracing::info!("[host] Reloaded manifest for \"{name}\"");
        Ok(())
    }

    /// Watch every dev extension's checkout and re-read changed manifests.
    /// Events are debounced for half a second so editor save bursts
    /// collapse into one reload.
    pub fn start_dev_watcher(self: &Arc<Self>) -> HostResult<()> {
        let dev_dirs: Vec<(String, PathBuf)> = {
            let registry = self.registry.read();
            registry
                .plugins
                .values()
                .filter(|r| r.dev)
                .map(|r| {
                    (
                        r.name.clone(),
                        r.source_path.clone().unwrap_or_else(|| r.install_path.clone()),
                    )
                })
                .collect()
        };
        if dev_dirs.is_empty() {
            return Ok(());
        }

        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())
            .map_err(|e| HostError::io("Failed to create dev watcher", e))?;
        for (_, dir) in &dev_dirs {
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .map_err(|e| HostError::io("Failed to watch dev checkout", e))?;
        }
        *self.dev_watcher.lock() = Some(watcher);

        let weak = Arc::downgrade(self);
        std::thread::spawn(move || {
            let debounce = Duration::from_millis(500);
            loop {
                let first = match rx.recv() {
                    Ok(Ok(event)) => event,
                    Ok(Err(e)) => {
                        tracing::warn!("[host] Dev watcher error: {e}");
                        continue;
                    }
                    Err(_) => break,
                };

                let mut changed = std::collections::HashSet::new();
                let mut note = |event: &notify::Event| {
                    for (name, dir) in &dev_dirs {
                        if event.paths.iter().any(|p| p.starts_with(dir)) {
                            changed.insert(name.clone());
                        }
                    }
                };
                note(&first);

                let deadline = std::time::Instant::now() + debounce;
                loop {
                    let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match rx.recv_timeout(remaining) {
                        Ok(Ok(event)) => note(&event),
                        Ok(Err(e)) => tracing::warn!("[host] Dev watcher error: {e}"),
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => break,
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
                    }
                }

                let Some(host) = weak.upgrade() else { break };
                for name in changed {
                    if let Err(e) = host.reload_manifest(&name) {
                        tracing::warn!("[host] Manifest reload for \"{name}\" failed: {e}");
                    }
                }
            }
        });

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read and normalize `manifest.json` from a package directory.
fn read_manifest(dir: &Path) -> HostResult<PluginManifest> {
    let path = dir.join("manifest.json");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| HostError::Validation(format!("cannot read {}: {e}", path.display())))?;
    let raw: Value = serde_json::from_str(&content)
        .map_err(|e| HostError::Validation(format!("manifest.json is not valid JSON: {e}")))?;
    normalize_manifest(&raw)
}

/// Recursively copy a package directory into the host's plugins dir.
fn copy_dir_recursive(from: &Path, to: &Path) -> HostResult<()> {
    std::fs::create_dir_all(to)
        .map_err(|e| HostError::io(&format!("Failed to create dir {}", to.display()), e))?;

    for entry in std::fs::read_dir(from)
        .map_err(|e| HostError::io(&format!("Failed to read dir {}", from.display()), e))?
    {
        let entry = entry.map_err(|e| HostError::io("Dir entry error", e))?;
        let dest = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| HostError::io("File type error", e))?;

        if file_type.is_file() {
            std::fs::copy(entry.path(), &dest).map_err(|e| HostError::io("Copy error", e))?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slates::SlateHooks;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -- Fixture plumbing --

    /// Module that registers a command (and optionally UI surfaces) in its
    /// activate hook, and counts hook invocations.
    struct TestModule {
        plugin: String,
        fail_activation: bool,
        register_ui: bool,
        activations: Arc<AtomicUsize>,
        deactivations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PluginModule for TestModule {
        async fn activate(&self, api: ExtensionApi) -> anyhow::Result<()> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            api.commands().register(
                "sync",
                Arc::new(|args| Box::pin(async move { Ok(json!({ "synced": args.len() })) })),
            )?;
            if self.register_ui {
                api.status_bar().register_item("status", "WF", None, 10)?;
                api.keybindings()
                    .register(&format!("ctrl+alt+{}", self.plugin), "sync")?;
                api.context_menu().register_item("ctx", "Sync now", "sync", None)?;
                api.file_decorations().register_provider("deco", Arc::new(|_| None))?;
                api.slates()
                    .register("devlink", vec!["*.cfg.json".into()], SlateHooks::default())?;
                api.slates().register_preload_script("boot", "console.log('up')")?;
                api.terminal().register_command("tail-log", "tail -f host.log")?;
                api.events().on("tick", Arc::new(|_| Ok(())));
            }
            if self.fail_activation {
                anyhow::bail!("activate() threw");
            }
            Ok(())
        }

        async fn deactivate(&self) -> anyhow::Result<()> {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TestLoader {
        register_ui: bool,
        fail: Mutex<HashSet<String>>,
        activations: Arc<AtomicUsize>,
        deactivations: Arc<AtomicUsize>,
    }

    impl TestLoader {
        fn new(register_ui: bool) -> Arc<Self> {
            Arc::new(Self {
                register_ui,
                fail: Mutex::new(HashSet::new()),
                activations: Arc::new(AtomicUsize::new(0)),
                deactivations: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait]
    impl ModuleLoader for TestLoader {
        async fn load(&self, plugin: &str, _entry: &Path) -> HostResult<Arc<dyn PluginModule>> {
            Ok(Arc::new(TestModule {
                plugin: plugin.to_string(),
                fail_activation: self.fail.lock().contains(plugin),
                register_ui: self.register_ui,
                activations: Arc::clone(&self.activations),
                deactivations: Arc::clone(&self.deactivations),
            }))
        }
    }

    /// Resolves package identifiers against a directory of unpacked
    /// packages (what a catalog download would produce).
    struct CatalogResolver {
        base: PathBuf,
    }

    #[async_trait]
    impl PackageResolver for CatalogResolver {
        async fn resolve(&self, source: &InstallSource, _version: Option<&str>) -> HostResult<PathBuf> {
            match source {
                InstallSource::Path(path) => Ok(path.clone()),
                InstallSource::Package(id) => {
                    let dir = self.base.join(id);
                    if dir.is_dir() {
                        Ok(dir)
                    } else {
                        Err(HostError::NotFound(format!("package \"{id}\"")))
                    }
                }
            }
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        host: Arc<PluginHost>,
        loader: Arc<TestLoader>,
        pkg_root: PathBuf,
        data_dir: PathBuf,
    }

    fn fixture(register_ui: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let pkg_root = tmp.path().join("packages");
        let workspace = tmp.path().join("workspace");
        let data_dir = tmp.path().join("host");
        std::fs::create_dir_all(&pkg_root).unwrap();
        std::fs::create_dir_all(&workspace).unwrap();

        let loader = TestLoader::new(register_ui);
        let host = PluginHost::new(HostOptions {
            data_dir: data_dir.clone(),
            workspace_root: workspace,
            resolver: Arc::new(CatalogResolver { base: pkg_root.clone() }),
            loader: loader.clone(),
            ui: None,
            editor: None,
            terminal: None,
            shell_allowlist: vec![],
            command_timeout: Some(Duration::from_secs(5)),
        });

        Fixture { _tmp: tmp, host, loader, pkg_root, data_dir }
    }

    /// Second host over the same data dir — a simulated restart.
    fn restart(fx: &Fixture, register_ui: bool) -> (Arc<PluginHost>, Arc<TestLoader>) {
        let loader = TestLoader::new(register_ui);
        let host = PluginHost::new(HostOptions {
            data_dir: fx.data_dir.clone(),
            workspace_root: fx._tmp.path().join("workspace"),
            resolver: Arc::new(CatalogResolver { base: fx.pkg_root.clone() }),
            loader: loader.clone(),
            ui: None,
            editor: None,
            terminal: None,
            shell_allowlist: vec![],
            command_timeout: Some(Duration::from_secs(5)),
        });
        (host, loader)
    }

    fn write_package(root: &Path, name: &str, manifest: Value) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.join("main.js"), "// entry\n").unwrap();
        dir
    }

    fn basic_manifest(name: &str) -> Value {
        json!({ "name": name, "version": "1.0.0" })
    }

    fn ui_manifest(name: &str) -> Value {
        json!({
            "name": name,
            "version": "1.0.0",
            "entitlements": {
                "ui": {
                    "notifications": true, "statusBar": true, "contextMenu": true,
                    "dialogs": true, "slates": true, "decorations": true
                },
                "keybindings": { "register": true },
                "webview": { "create": true },
                "terminal": { "write": true }
            }
        })
    }

    async fn install_from_catalog(fx: &Fixture, name: &str, manifest: Value) -> InstalledPlugin {
        write_package(&fx.pkg_root, name, manifest);
        fx.host
            .install(InstallSource::Package(name.into()), None)
            .await
            .unwrap()
    }

    // -- Install / activate --

    #[tokio::test]
    async fn install_activates_and_registers_commands() {
        let fx = fixture(false);
        let record = install_from_catalog(&fx, "wf", basic_manifest("wf")).await;

        assert_eq!(record.state, PluginState::Active);
        assert!(fx.host.is_active("wf"));
        assert_eq!(fx.loader.activations.load(Ordering::SeqCst), 1);

        let out = fx.host.execute_command("wf.sync", vec![json!(1)]).await.unwrap();
        assert_eq!(out, json!({ "synced": 1 }));
    }

    #[tokio::test]
    async fn bare_command_id_is_not_reachable() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        let err = fx.host.execute_command("sync", vec![]).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));
    }

    #[tokio::test]
    async fn activation_failure_does_not_fail_install() {
        let fx = fixture(false);
        fx.loader.fail.lock().insert("wf".into());
        let record = install_from_catalog(&fx, "wf", basic_manifest("wf")).await;

        assert_eq!(record.state, PluginState::Error);
        assert!(record.last_error.as_deref().unwrap().contains("activate() threw"));
        assert!(!fx.host.is_active("wf"));
        // No partial activation: the command the hook registered before
        // throwing was swept.
        assert!(fx.host.commands.is_empty());
    }

    #[tokio::test]
    async fn error_state_is_retryable() {
        let fx = fixture(false);
        fx.loader.fail.lock().insert("wf".into());
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        assert_eq!(fx.host.get_plugin("wf").unwrap().state, PluginState::Error);

        fx.loader.fail.lock().remove("wf");
        fx.host.activate("wf").await.unwrap();
        assert!(fx.host.is_active("wf"));
        assert!(fx.host.get_plugin("wf").unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn activate_twice_is_idempotent() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;

        fx.host.activate("wf").await.unwrap();
        assert_eq!(fx.loader.activations.load(Ordering::SeqCst), 1);
        assert_eq!(fx.host.commands.len(), 1);
    }

    #[tokio::test]
    async fn missing_entry_point_records_error() {
        let fx = fixture(false);
        let dir = write_package(&fx.pkg_root, "wf", basic_manifest("wf"));
        std::fs::remove_file(dir.join("main.js")).unwrap();

        let record = fx
            .host
            .install(InstallSource::Package("wf".into()), None)
            .await
            .unwrap();
        assert_eq!(record.state, PluginState::Error);
        assert!(record.last_error.as_deref().unwrap().contains("not found"));
    }

    // -- Deactivate / teardown --

    #[tokio::test]
    async fn activate_then_deactivate_ends_inactive() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;

        fx.host.deactivate("wf").await.unwrap();
        assert_eq!(fx.host.get_plugin("wf").unwrap().state, PluginState::Inactive);
        assert!(!fx.host.is_active("wf"));
        assert_eq!(fx.loader.deactivations.load(Ordering::SeqCst), 1);

        let err = fx.host.execute_command("wf.sync", vec![]).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));
    }

    #[tokio::test]
    async fn deactivate_when_not_active_is_a_noop() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        fx.host.deactivate("wf").await.unwrap();
        fx.host.deactivate("wf").await.unwrap();
        assert_eq!(fx.loader.deactivations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_is_exhaustive_across_all_tables() {
        let fx = fixture(true);
        install_from_catalog(&fx, "wf", ui_manifest("wf")).await;

        assert!(fx.host.registrations.count_owned_by("wf") >= 6);
        assert_eq!(fx.host.slates.slate_count(), 1);
        assert_eq!(fx.host.commands.len(), 1);

        fx.host.deactivate("wf").await.unwrap();

        assert_eq!(fx.host.registrations.count_owned_by("wf"), 0);
        assert_eq!(fx.host.slates.slate_count(), 0);
        assert_eq!(fx.host.commands.len(), 0);
        assert_eq!(fx.host.events.subscriber_count("tick"), 0);
    }

    #[tokio::test]
    async fn reactivation_after_deactivate_is_permitted() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        fx.host.deactivate("wf").await.unwrap();
        fx.host.activate("wf").await.unwrap();
        assert!(fx.host.is_active("wf"));
        assert_eq!(fx.loader.activations.load(Ordering::SeqCst), 2);
    }

    // -- Enable / disable --

    #[tokio::test]
    async fn disabling_an_active_extension_deactivates_it() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;

        fx.host.set_enabled("wf", false).await.unwrap();
        let record = fx.host.get_plugin("wf").unwrap();
        assert!(!record.enabled);
        assert_eq!(record.state, PluginState::Inactive);

        let err = fx.host.execute_command("wf.sync", vec![]).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));

        // Explicit activation of a disabled extension is a no-op
        fx.host.activate("wf").await.unwrap();
        assert!(!fx.host.is_active("wf"));
    }

    #[tokio::test]
    async fn enabling_activates_immediately() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        fx.host.set_enabled("wf", false).await.unwrap();

        fx.host.set_enabled("wf", true).await.unwrap();
        assert!(fx.host.is_active("wf"));
    }

    // -- Uninstall / update --

    #[tokio::test]
    async fn uninstall_removes_files_and_record() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        let install_path = fx.host.get_plugin("wf").unwrap().install_path;
        assert!(install_path.exists());

        fx.host.uninstall("wf").await.unwrap();
        assert!(fx.host.get_plugin("wf").is_none());
        assert!(!install_path.exists());
        assert!(fx.host.commands.is_empty());
    }

    #[tokio::test]
    async fn uninstall_unknown_extension_fails_not_found() {
        let fx = fixture(false);
        let err = fx.host.uninstall("ghost").await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_applies_new_entitlements_and_reactivates() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        assert!(fx.host.check_capability("wf", Capability::ProcessSpawn).is_err());

        write_package(
            &fx.pkg_root,
            "wf",
            json!({
                "name": "wf",
                "version": "1.1.0",
                "entitlements": { "process": { "spawn": true } }
            }),
        );
        let record = fx.host.update("wf").await.unwrap();

        assert_eq!(record.version, "1.1.0");
        assert_eq!(record.state, PluginState::Active);
        assert!(fx.host.check_capability("wf", Capability::ProcessSpawn).is_ok());
        // Exactly one fresh set of registrations after the restart cycle
        assert_eq!(fx.host.commands.len(), 1);
    }

    #[tokio::test]
    async fn update_leaves_inactive_extensions_inactive() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        fx.host.deactivate("wf").await.unwrap();

        write_package(&fx.pkg_root, "wf", json!({ "name": "wf", "version": "2.0.0" }));
        let record = fx.host.update("wf").await.unwrap();
        assert_eq!(record.version, "2.0.0");
        assert_eq!(record.state, PluginState::Inactive);
    }

    // -- Batch operations & restart --

    #[tokio::test]
    async fn startup_activation_continues_past_failures() {
        let fx = fixture(false);
        install_from_catalog(&fx, "aaa-broken", basic_manifest("aaa-broken")).await;
        install_from_catalog(&fx, "zzz-fine", basic_manifest("zzz-fine")).await;

        let (host2, loader2) = restart(&fx, false);
        loader2.fail.lock().insert("aaa-broken".into());
        host2.activate_all_enabled().await;

        assert_eq!(host2.get_plugin("aaa-broken").unwrap().state, PluginState::Error);
        assert!(host2.is_active("zzz-fine"));
    }

    #[tokio::test]
    async fn registry_and_settings_survive_restart() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;
        fx.host.settings.set("wf", "interval", json!(30)).unwrap();
        fx.host.state.set("wf", "cursor", json!("abc")).unwrap();

        let (host2, _) = restart(&fx, false);
        let record = host2.get_plugin("wf").unwrap();
        // Runtime states collapse to inactive at boot
        assert_eq!(record.state, PluginState::Inactive);
        assert_eq!(host2.settings.get("wf", "interval"), Some(json!(30)));
        assert_eq!(host2.state.get("wf", "cursor"), Some(json!("abc")));
    }

    #[tokio::test]
    async fn deactivate_all_stops_everything() {
        let fx = fixture(false);
        install_from_catalog(&fx, "one", basic_manifest("one")).await;
        install_from_catalog(&fx, "two", basic_manifest("two")).await;

        fx.host.deactivate_all().await;
        assert!(!fx.host.is_active("one"));
        assert!(!fx.host.is_active("two"));
        assert!(fx.host.commands.is_empty());
    }

    // -- Permission enforcement --

    #[tokio::test]
    async fn shell_exec_without_grant_names_the_capability() {
        let fx = fixture(false);
        install_from_catalog(
            &fx,
            "wf",
            json!({
                "name": "wf",
                "version": "1.0.0",
                "entitlements": { "process": { "spawn": false } }
            }),
        )
        .await;

        let api = ExtensionApi::new(Arc::clone(&fx.host), "wf");
        let err = api.shell().exec("git", &[], None).await.unwrap_err();
        assert!(matches!(err, HostError::PermissionDenied { .. }));
        assert!(err.to_string().contains("process.spawn"));
    }

    #[tokio::test]
    async fn denied_registration_leaves_no_side_effect() {
        let fx = fixture(false);
        install_from_catalog(&fx, "wf", basic_manifest("wf")).await;

        let api = ExtensionApi::new(Arc::clone(&fx.host), "wf");
        let err = api.status_bar().register_item("s", "X", None, 0).unwrap_err();
        assert!(err.to_string().contains("ui.statusBar"));
        assert!(fx.host.registrations.status_bar.is_empty());

        let err = api.keybindings().register("ctrl+x", "wf.sync").unwrap_err();
        assert!(err.to_string().contains("keybindings.register"));
        assert!(fx.host.registrations.keybindings.is_empty());
    }

    #[tokio::test]
    async fn workspace_api_is_sandboxed_to_the_workspace_root() {
        let fx = fixture(false);
        install_from_catalog(
            &fx,
            "wf",
            json!({
                "name": "wf",
                "version": "1.0.0",
                "entitlements": { "filesystem": { "read": true, "write": true } }
            }),
        )
        .await;

        let api = ExtensionApi::new(Arc::clone(&fx.host), "wf");
        api.workspace().write_file("notes.txt", "hello").unwrap();
        assert_eq!(api.workspace().read_file("notes.txt").unwrap(), "hello");

        let names = api.workspace().list_directory(".", Some("*.txt")).unwrap();
        assert_eq!(names, vec!["notes.txt"]);

        assert!(api.workspace().read_file("../outside.txt").is_err());
    }

    #[tokio::test]
    async fn read_only_filesystem_grant_rejects_writes() {
        let fx = fixture(false);
        install_from_catalog(
            &fx,
            "wf",
            json!({
                "name": "wf",
                "version": "1.0.0",
                "entitlements": { "filesystem": { "read": true } }
            }),
        )
        .await;

        let api = ExtensionApi::new(Arc::clone(&fx.host), "wf");
        let err = api.workspace().write_file("notes.txt", "x").unwrap_err();
        assert!(err.to_string().contains("filesystem.write"));
    }

    // -- Local dev --

    #[tokio::test]
    async fn dev_manifest_reload_changes_grants_without_reactivation() {
        let fx = fixture(false);
        let checkout = write_package(&fx.pkg_root, "wf", basic_manifest("wf"));
        fx.host.install_dev(&checkout).await.unwrap();
        assert!(fx.host.is_active("wf"));
        assert!(fx.host.check_capability("wf", Capability::FilesystemRead).is_err());

        std::fs::write(
            checkout.join("manifest.json"),
            serde_json::to_string_pretty(&json!({
                "name": "wf",
                "version": "1.0.1",
                "entitlements": { "filesystem": { "read": true } }
            }))
            .unwrap(),
        )
        .unwrap();
        fx.host.reload_manifest("wf").unwrap();

        assert!(fx.host.check_capability("wf", Capability::FilesystemRead).is_ok());
        assert_eq!(fx.loader.activations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn uninstalling_a_dev_extension_keeps_the_checkout() {
        let fx = fixture(false);
        let checkout = write_package(&fx.pkg_root, "wf", basic_manifest("wf"));
        fx.host.install_dev(&checkout).await.unwrap();

        fx.host.uninstall("wf").await.unwrap();
        assert!(checkout.exists());
        assert!(fx.host.get_plugin("wf").is_none());
    }
}
