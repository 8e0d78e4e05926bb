//! The per-extension capability API.
//!
//! `ExtensionApi` is built once per activation, closing over the owning
//! extension's name and a handle to the host. Every namespace re-checks
//! its entitlement *at call time* — never at construction — so a local-dev
//! extension whose manifest changed on disk picks up new grants without
//! re-activation, and a revoked grant takes effect immediately.
//!
//! A privileged call with an insufficient grant fails with
//! `PermissionDenied` naming the missing capability and performs no
//! side effect. Registration methods return a `Disposable`; disposing is
//! idempotent and removes exactly that registration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::commands::CommandHandler;
use crate::error::{HostError, HostResult};
use crate::host::PluginHost;
use crate::host_log::LogLevel;
use crate::manifest::Capability;
use crate::protocol::{HostMessage, IsolationChannel, RequestHandler};
use crate::settings::{SettingSchemaEntry, SettingsCallback};
use crate::slates::{SlateConfig, SlateHooks};

// ---------------------------------------------------------------------------
// Disposal handles
// ---------------------------------------------------------------------------

/// Handle returned by every mutating registration. `dispose` removes
/// exactly that registration; calling it twice is a no-op.
pub struct Disposable {
    inner: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Disposable {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self { inner: Mutex::new(Some(Box::new(f))) }
    }

    /// A handle that does nothing (already-satisfied registrations).
    pub fn noop() -> Self {
        Self { inner: Mutex::new(None) }
    }

    pub fn dispose(&self) {
        if let Some(f) = self.inner.lock().take() {
            f();
        }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registration tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBarItem {
    pub id: String,
    pub owner: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMenuItem {
    pub id: String,
    pub owner: String,
    pub label: String,
    /// Command executed when the item is picked.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keybinding {
    pub key: String,
    pub owner: String,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDecoration {
    pub badge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

pub type DecorationProvider = Arc<dyn Fn(&str) -> Option<FileDecoration> + Send + Sync>;
pub type CompletionProvider = Arc<dyn Fn(&str, usize) -> Vec<String> + Send + Sync>;

pub(crate) struct DecorationEntry {
    pub owner: String,
    pub provider: DecorationProvider,
}

pub(crate) struct CompletionEntry {
    pub owner: String,
    pub provider: CompletionProvider,
}

#[derive(Debug, Clone)]
pub struct PreloadScript {
    pub id: String,
    pub owner: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct TerminalCommand {
    pub name: String,
    pub owner: String,
    pub command: String,
}

pub(crate) struct WatcherEntry {
    pub owner: String,
    // Dropping the watcher stops its notify thread
    #[allow(dead_code)]
    pub watcher: notify::RecommendedWatcher,
}

/// Shared, host-owned registration tables. Everything in here is keyed so
/// a deactivating extension can be swept by owner equality.
#[derive(Default)]
pub struct RegistrationTables {
    pub(crate) status_bar: DashMap<String, StatusBarItem>,
    pub(crate) decorations: DashMap<String, DecorationEntry>,
    pub(crate) context_menu: DashMap<String, ContextMenuItem>,
    pub(crate) keybindings: DashMap<String, Keybinding>,
    pub(crate) completions: DashMap<String, CompletionEntry>,
    pub(crate) preload_scripts: DashMap<String, PreloadScript>,
    pub(crate) terminal_commands: DashMap<String, TerminalCommand>,
    pub(crate) watchers: DashMap<String, WatcherEntry>,
}

impl RegistrationTables {
    pub(crate) fn remove_owned_by(&self, plugin: &str) {
        self.status_bar.retain(|_, v| v.owner != plugin);
        self.decorations.retain(|_, v| v.owner != plugin);
        self.context_menu.retain(|_, v| v.owner != plugin);
        self.keybindings.retain(|_, v| v.owner != plugin);
        self.completions.retain(|_, v| v.owner != plugin);
        self.preload_scripts.retain(|_, v| v.owner != plugin);
        self.terminal_commands.retain(|_, v| v.owner != plugin);
        self.watchers.retain(|_, v| v.owner != plugin);
    }

    /// Total registrations owned by `plugin` across every table.
    pub fn count_owned_by(&self, plugin: &str) -> usize {
        self.status_bar.iter().filter(|e| e.owner == plugin).count()
            + self.decorations.iter().filter(|e| e.owner == plugin).count()
            + self.context_menu.iter().filter(|e| e.owner == plugin).count()
            + self.keybindings.iter().filter(|e| e.owner == plugin).count()
            + self.completions.iter().filter(|e| e.owner == plugin).count()
            + self.preload_scripts.iter().filter(|e| e.owner == plugin).count()
            + self.terminal_commands.iter().filter(|e| e.owner == plugin).count()
            + self.watchers.iter().filter(|e| e.owner == plugin).count()
    }

    /// Aggregate completions from every registered provider.
    pub fn completions_for(&self, context: &str, position: usize) -> Vec<String> {
        self.completions
            .iter()
            .flat_map(|entry| (entry.value().provider)(context, position))
            .collect()
    }

    pub fn status_bar_items(&self) -> Vec<StatusBarItem> {
        let mut items: Vec<_> = self.status_bar.iter().map(|e| e.value().clone()).collect();
        items.sort_by_key(|i| std::cmp::Reverse(i.priority));
        items
    }

    pub fn context_menu_items(&self) -> Vec<ContextMenuItem> {
        self.context_menu.iter().map(|e| e.value().clone()).collect()
    }

    pub fn keybindings(&self) -> Vec<Keybinding> {
        self.keybindings.iter().map(|e| e.value().clone()).collect()
    }

    pub fn preload_scripts(&self) -> Vec<PreloadScript> {
        self.preload_scripts.iter().map(|e| e.value().clone()).collect()
    }

    pub fn terminal_commands(&self) -> Vec<TerminalCommand> {
        self.terminal_commands.iter().map(|e| e.value().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// The API object
// ---------------------------------------------------------------------------

/// The capability-scoped API handed to one extension's `activate` hook.
#[derive(Clone)]
pub struct ExtensionApi {
    pub(crate) host: Arc<PluginHost>,
    pub(crate) plugin: String,
}

impl ExtensionApi {
    pub(crate) fn new(host: Arc<PluginHost>, plugin: &str) -> Self {
        Self { host, plugin: plugin.to_string() }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// Call-time entitlement check. Reads the *current* manifest so grant
    /// changes (dev reloads, updates) apply without re-activation.
    pub(crate) fn check(&self, cap: Capability) -> HostResult<()> {
        self.host.check_capability(&self.plugin, cap)
    }

    pub fn commands(&self) -> CommandsApi {
        CommandsApi { api: self.clone() }
    }
    pub fn workspace(&self) -> crate::api_fs::WorkspaceApi {
        crate::api_fs::WorkspaceApi { api: self.clone() }
    }
    pub fn editor(&self) -> EditorApi {
        EditorApi { api: self.clone() }
    }
    pub fn terminal(&self) -> TerminalApi {
        TerminalApi { api: self.clone() }
    }
    pub fn shell(&self) -> crate::api_shell::ShellApi {
        crate::api_shell::ShellApi { api: self.clone() }
    }
    pub fn http(&self) -> crate::api_http::HttpApi {
        crate::api_http::HttpApi { api: self.clone() }
    }
    pub fn git(&self) -> crate::api_git::GitApi {
        crate::api_git::GitApi { api: self.clone() }
    }
    pub fn notifications(&self) -> NotificationsApi {
        NotificationsApi { api: self.clone() }
    }
    pub fn log(&self) -> LogApi {
        LogApi { api: self.clone() }
    }
    pub fn configuration(&self) -> ConfigurationApi {
        ConfigurationApi { api: self.clone() }
    }
    pub fn events(&self) -> EventsApi {
        EventsApi { api: self.clone() }
    }
    pub fn status_bar(&self) -> StatusBarApi {
        StatusBarApi { api: self.clone() }
    }
    pub fn file_decorations(&self) -> FileDecorationsApi {
        FileDecorationsApi { api: self.clone() }
    }
    pub fn context_menu(&self) -> ContextMenuApi {
        ContextMenuApi { api: self.clone() }
    }
    pub fn keybindings(&self) -> KeybindingsApi {
        KeybindingsApi { api: self.clone() }
    }
    pub fn settings(&self) -> SettingsApi {
        SettingsApi { api: self.clone() }
    }
    pub fn slates(&self) -> SlatesApi {
        SlatesApi { api: self.clone() }
    }
    pub fn state(&self) -> StateApi {
        StateApi { api: self.clone() }
    }
    pub fn paths(&self) -> PathsApi {
        PathsApi { api: self.clone() }
    }
    pub fn ui(&self) -> UiApi {
        UiApi { api: self.clone() }
    }
    pub fn utils(&self) -> UtilsApi {
        UtilsApi
    }
}

// ---------------------------------------------------------------------------
// commands
// ---------------------------------------------------------------------------

pub struct CommandsApi {
    api: ExtensionApi,
}

impl CommandsApi {
    /// Register a command handler. Bare IDs are qualified with the
    /// extension's namespace.
    pub fn register(&self, id: &str, handler: CommandHandler) -> HostResult<Disposable> {
        self.api.host.commands.register(&self.api.plugin, id, handler)
    }

    /// Execute any registered command by fully-qualified ID.
    pub async fn execute(&self, id: &str, args: Vec<Value>) -> HostResult<Value> {
        self.api.host.execute_command(id, args).await
    }
}

// ---------------------------------------------------------------------------
// editor / terminal (collaborator-backed)
// ---------------------------------------------------------------------------

pub struct EditorApi {
    api: ExtensionApi,
}

impl EditorApi {
    pub fn active_file(&self) -> HostResult<Option<PathBuf>> {
        self.api.check(Capability::EditorRead)?;
        Ok(self.api.host.editor.active_file())
    }

    pub async fn open_file(&self, path: &str) -> HostResult<()> {
        self.api.check(Capability::EditorWrite)?;
        self.api
            .host
            .editor
            .open_file(path)
            .await
            .map_err(|e| HostError::io("Failed to open file", e))
    }

    pub async fn insert_text(&self, text: &str) -> HostResult<()> {
        self.api.check(Capability::EditorWrite)?;
        self.api
            .host
            .editor
            .insert_text(text)
            .await
            .map_err(|e| HostError::io("Failed to insert text", e))
    }

    /// Completions are computed against buffer contents, hence gated on
    /// editor read access.
    pub fn register_completion_provider(
        &self,
        id: &str,
        provider: CompletionProvider,
    ) -> HostResult<Disposable> {
        self.api.check(Capability::EditorRead)?;
        let full_id = format!("{}.{id}", self.api.plugin);
        self.api.host.registrations.completions.insert(
            full_id.clone(),
            CompletionEntry { owner: self.api.plugin.clone(), provider },
        );
        let host = Arc::clone(&self.api.host);
        Ok(Disposable::new(move || {
            host.registrations.completions.remove(&full_id);
        }))
    }
}

pub struct TerminalApi {
    api: ExtensionApi,
}

impl TerminalApi {
    pub async fn write(&self, text: &str) -> HostResult<()> {
        self.api.check(Capability::TerminalWrite)?;
        self.api
            .host
            .terminal
            .write(text)
            .await
            .map_err(|e| HostError::io("Failed to write to terminal", e))
    }

    pub async fn read_screen(&self) -> HostResult<String> {
        self.api.check(Capability::TerminalRead)?;
        self.api
            .host
            .terminal
            .read_screen()
            .await
            .map_err(|e| HostError::io("Failed to read terminal", e))
    }

    /// Register a named terminal command (a snippet the user can run from
    /// the terminal palette).
    pub fn register_command(&self, name: &str, command: &str) -> HostResult<Disposable> {
        self.api.check(Capability::TerminalWrite)?;
        let key = format!("{}.{name}", self.api.plugin);
        self.api.host.registrations.terminal_commands.insert(
            key.clone(),
            TerminalCommand {
                name: key.clone(),
                owner: self.api.plugin.clone(),
                command: command.to_string(),
            },
        );
        let host = Arc::clone(&self.api.host);
        Ok(Disposable::new(move || {
            host.registrations.terminal_commands.remove(&key);
        }))
    }
}

// ---------------------------------------------------------------------------
// notifications / ui / log
// ---------------------------------------------------------------------------

pub struct NotificationsApi {
    api: ExtensionApi,
}

impl NotificationsApi {
    fn notify(&self, level: LogLevel, message: &str) -> HostResult<()> {
        self.api.check(Capability::UiNotifications)?;
        self.api.host.ui.notify(&self.api.plugin, level, message);
        Ok(())
    }

    pub fn info(&self, message: &str) -> HostResult<()> {
        self.notify(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> HostResult<()> {
        self.notify(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> HostResult<()> {
        self.notify(LogLevel::Error, message)
    }
}

pub struct UiApi {
    api: ExtensionApi,
}

impl UiApi {
    pub async fn show_input(&self, prompt: &str, placeholder: Option<&str>) -> HostResult<Option<String>> {
        self.api.check(Capability::UiDialogs)?;
        Ok(self.api.host.ui.show_input(&self.api.plugin, prompt, placeholder).await)
    }

    pub async fn show_quick_pick(&self, items: Vec<String>) -> HostResult<Option<String>> {
        self.api.check(Capability::UiDialogs)?;
        Ok(self.api.host.ui.show_quick_pick(&self.api.plugin, items).await)
    }
}

/// Unprivileged: every extension may log into the host ring buffer.
pub struct LogApi {
    api: ExtensionApi,
}

impl LogApi {
    pub fn debug(&self, message: &str) {
        self.api.host.log.push(LogLevel::Debug, &self.api.plugin, message);
    }
    pub fn info(&self, message: &str) {
        self.api.host.log.push(LogLevel::Info, &self.api.plugin, message);
    }
    pub fn warn(&self, message: &str) {
        self.api.host.log.push(LogLevel::Warn, &self.api.plugin, message);
    }
    pub fn error(&self, message: &str) {
        self.api.host.log.push(LogLevel::Error, &self.api.plugin, message);
    }
}

// ---------------------------------------------------------------------------
// configuration / events
// ---------------------------------------------------------------------------

/// Read-only view of the host application's configuration.
pub struct ConfigurationApi {
    api: ExtensionApi,
}

impl ConfigurationApi {
    pub fn get(&self, key: &str) -> HostResult<Option<Value>> {
        self.api.check(Capability::SystemInfo)?;
        Ok(self.api.host.configuration.read().get(key).cloned())
    }

    pub fn keys(&self) -> HostResult<Vec<String>> {
        self.api.check(Capability::SystemInfo)?;
        Ok(self.api.host.configuration.read().keys().cloned().collect())
    }

    /// Fires on host configuration changes, delivered through the event
    /// bus under `configuration.changed`.
    pub fn on_change(&self, callback: crate::events::EventCallback) -> HostResult<Disposable> {
        self.api.check(Capability::SystemInfo)?;
        Ok(self
            .api
            .host
            .events
            .subscribe(&self.api.plugin, "configuration.changed", callback))
    }
}

pub struct EventsApi {
    api: ExtensionApi,
}

impl EventsApi {
    pub fn on(&self, event_type: &str, callback: crate::events::EventCallback) -> Disposable {
        self.api.host.events.subscribe(&self.api.plugin, event_type, callback)
    }

    pub fn emit(&self, event_type: &str, payload: Value) {
        self.api.host.events.emit(event_type, &payload);
    }
}

// ---------------------------------------------------------------------------
// status bar / decorations / context menu / keybindings
// ---------------------------------------------------------------------------

pub struct StatusBarApi {
    api: ExtensionApi,
}

impl StatusBarApi {
    pub fn register_item(
        &self,
        id: &str,
        text: &str,
        tooltip: Option<&str>,
        priority: i32,
    ) -> HostResult<Disposable> {
        self.api.check(Capability::UiStatusBar)?;
        let full_id = format!("{}.{id}", self.api.plugin);
        self.api.host.registrations.status_bar.insert(
            full_id.clone(),
            StatusBarItem {
                id: full_id.clone(),
                owner: self.api.plugin.clone(),
                text: text.to_string(),
                tooltip: tooltip.map(|t| t.to_string()),
                priority,
            },
        );
        let host = Arc::clone(&self.api.host);
        Ok(Disposable::new(move || {
            host.registrations.status_bar.remove(&full_id);
        }))
    }
}

pub struct FileDecorationsApi {
    api: ExtensionApi,
}

impl FileDecorationsApi {
    pub fn register_provider(&self, id: &str, provider: DecorationProvider) -> HostResult<Disposable> {
        self.api.check(Capability::UiDecorations)?;
        let full_id = format!("{}.{id}", self.api.plugin);
        self.api.host.registrations.decorations.insert(
            full_id.clone(),
            DecorationEntry { owner: self.api.plugin.clone(), provider },
        );
        let host = Arc::clone(&self.api.host);
        Ok(Disposable::new(move || {
            host.registrations.decorations.remove(&full_id);
        }))
    }
}

pub struct ContextMenuApi {
    api: ExtensionApi,
}

impl ContextMenuApi {
    pub fn register_item(
        &self,
        id: &str,
        label: &str,
        command: &str,
        when: Option<&str>,
    ) -> HostResult<Disposable> {
        self.api.check(Capability::UiContextMenu)?;
        let full_id = format!("{}.{id}", self.api.plugin);
        self.api.host.registrations.context_menu.insert(
            full_id.clone(),
            ContextMenuItem {
                id: full_id.clone(),
                owner: self.api.plugin.clone(),
                label: label.to_string(),
                command: command.to_string(),
                when: when.map(|w| w.to_string()),
            },
        );
        let host = Arc::clone(&self.api.host);
        Ok(Disposable::new(move || {
            host.registrations.context_menu.remove(&full_id);
        }))
    }
}

pub struct KeybindingsApi {
    api: ExtensionApi,
}

impl KeybindingsApi {
    /// Bind a key chord to a command. Later registrations of the same
    /// chord replace earlier ones; the replacement is logged.
    pub fn register(&self, key: &str, command: &str) -> HostResult<Disposable> {
        self.api.check(Capability::KeybindingsRegister)?;
        let binding = Keybinding {
            key: key.to_string(),
            owner: self.api.plugin.clone(),
            command: command.to_string(),
        };
        if let Some(previous) = self.api.host.registrations.keybindings.insert(key.to_string(), binding)
        {
            tracing::warn!(
                "[api] Keybinding \"{key}\" rebound from \"{}\" to \"{}\"",
                previous.owner,
                self.api.plugin
            );
        }
        let host = Arc::clone(&self.api.host);
        let key = key.to_string();
        let owner = self.api.plugin.clone();
        Ok(Disposable::new(move || {
            host.registrations
                .keybindings
                .remove_if(&key, |_, binding| binding.owner == owner);
        }))
    }
}

// ---------------------------------------------------------------------------
// settings / state / slates / paths / utils
// ---------------------------------------------------------------------------

pub struct SettingsApi {
    api: ExtensionApi,
}

impl SettingsApi {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.api.host.settings.get(&self.api.plugin, key)
    }

    pub fn set(&self, key: &str, value: Value) -> HostResult<()> {
        self.api.host.settings.set(&self.api.plugin, key, value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.api.host.settings.keys(&self.api.plugin)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.api.host.settings.snapshot(&self.api.plugin)
    }

    pub fn register_schema(&self, schema: &[SettingSchemaEntry]) -> HostResult<()> {
        self.api.host.settings.register_schema(&self.api.plugin, schema)
    }

    pub fn on_change(&self, callback: SettingsCallback) -> Disposable {
        self.api.host.settings.on_change(&self.api.plugin, callback)
    }
}

pub struct StateApi {
    api: ExtensionApi,
}

impl StateApi {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.api.host.state.get(&self.api.plugin, key)
    }

    pub fn set(&self, key: &str, value: Value) -> HostResult<()> {
        self.api.host.state.set(&self.api.plugin, key, value).map(|_| ())
    }

    pub fn delete(&self, key: &str) -> HostResult<()> {
        self.api.host.state.delete(&self.api.plugin, key)
    }
}

pub struct SlatesApi {
    api: ExtensionApi,
}

impl SlatesApi {
    /// Register a slate bound to file patterns.
    pub fn register(&self, id: &str, patterns: Vec<String>, hooks: SlateHooks) -> HostResult<Disposable> {
        self.api.check(Capability::UiSlates)?;
        let config = SlateConfig {
            id: format!("{}.{id}", self.api.plugin),
            plugin_name: self.api.plugin.clone(),
            patterns,
        };
        Ok(self.api.host.slates.register(config, hooks))
    }

    /// Push rendered content to a mounted instance.
    pub fn render(&self, instance_id: &str, html: &str, script: Option<String>) -> HostResult<()> {
        self.api.check(Capability::UiSlates)?;
        self.api.host.slates.render(instance_id, html, script);
        Ok(())
    }

    /// Register a script injected into this extension's slate webviews.
    pub fn register_preload_script(&self, id: &str, source: &str) -> HostResult<Disposable> {
        self.api.check(Capability::WebviewCreate)?;
        let full_id = format!("{}.{id}", self.api.plugin);
        self.api.host.registrations.preload_scripts.insert(
            full_id.clone(),
            PreloadScript {
                id: full_id.clone(),
                owner: self.api.plugin.clone(),
                source: source.to_string(),
            },
        );
        let host = Arc::clone(&self.api.host);
        Ok(Disposable::new(move || {
            host.registrations.preload_scripts.remove(&full_id);
        }))
    }
}

/// Unprivileged path lookups. Handing out a path grants nothing — the
/// filesystem namespace still checks entitlements on access.
pub struct PathsApi {
    api: ExtensionApi,
}

impl PathsApi {
    pub fn plugin_dir(&self) -> PathBuf {
        self.api.host.paths.plugin_dir(&self.api.plugin)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.api.host.paths.plugin_data_dir(&self.api.plugin)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.api.host.workspace_root.clone()
    }
}

pub struct UtilsApi;

impl UtilsApi {
    pub fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn epoch_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

// ---------------------------------------------------------------------------
// Protocol request dispatch
// ---------------------------------------------------------------------------

/// Serves extension-initiated `request` envelopes against the extension's
/// own capability-checked API, so an isolated runtime gets exactly the
/// grants its manifest declares.
pub struct ApiRequestHandler {
    api: ExtensionApi,
    /// Present when the extension runs behind an isolation channel;
    /// enables `commands.register` with host→extension forwarding.
    channel: Option<Arc<IsolationChannel>>,
}

impl ApiRequestHandler {
    pub fn new(api: ExtensionApi) -> Self {
        Self { api, channel: None }
    }

    pub fn with_channel(api: ExtensionApi, channel: Arc<IsolationChannel>) -> Self {
        Self { api, channel: Some(channel) }
    }
}

fn param_str(params: &Value, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("missing string param \"{key}\""))
}

#[async_trait]
impl RequestHandler for ApiRequestHandler {
    async fn handle(&self, _plugin: &str, method: &str, params: Value) -> anyhow::Result<Value> {
        match method {
            "settings.get" => {
                let key = param_str(&params, "key")?;
                Ok(self.api.settings().get(&key).unwrap_or(Value::Null))
            }
            "settings.set" => {
                let key = param_str(&params, "key")?;
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                self.api.settings().set(&key, value)?;
                Ok(Value::Null)
            }
            "state.get" => {
                let key = param_str(&params, "key")?;
                Ok(self.api.state().get(&key).unwrap_or(Value::Null))
            }
            "state.set" => {
                let key = param_str(&params, "key")?;
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                self.api.state().set(&key, value)?;
                Ok(Value::Null)
            }
            "state.delete" => {
                let key = param_str(&params, "key")?;
                self.api.state().delete(&key)?;
                Ok(Value::Null)
            }
            "commands.execute" => {
                let id = param_str(&params, "id")?;
                let args = params
                    .get("args")
                    .and_then(|a| a.as_array())
                    .cloned()
                    .unwrap_or_default();
                Ok(self.api.commands().execute(&id, args).await?)
            }
            "commands.register" => {
                let channel = self
                    .channel
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("commands.register requires an isolation channel"))?;
                let id = param_str(&params, "id")?;
                // Host→extension `command` carries no correlation ID, so
                // forwarded invocations resolve to null on the host side.
                let full_id = crate::commands::CommandRouter::qualify(&self.api.plugin, &id);
                let forward_id = full_id.clone();
                let handler: CommandHandler = Arc::new(move |args| {
                    let channel = Arc::clone(&channel);
                    let command_id = forward_id.clone();
                    Box::pin(async move {
                        channel.send(HostMessage::Command { command_id, args })?;
                        Ok(Value::Null)
                    })
                });
                self.api.commands().register(&id, handler)?;
                Ok(json!({ "id": full_id }))
            }
            "events.emit" => {
                let event_type = param_str(&params, "eventType")?;
                let payload = params.get("payload").cloned().unwrap_or(Value::Null);
                self.api.events().emit(&event_type, payload);
                Ok(Value::Null)
            }
            "slates.render" => {
                let instance_id = param_str(&params, "instanceId")?;
                let html = param_str(&params, "html")?;
                let script = params
                    .get("script")
                    .and_then(|s| s.as_str())
                    .map(|s| s.to_string());
                self.api.slates().render(&instance_id, &html, script)?;
                Ok(Value::Null)
            }
            "notifications.notify" => {
                let message = param_str(&params, "message")?;
                let level = params.get("level").and_then(|l| l.as_str()).unwrap_or("info");
                match level {
                    "warn" => self.api.notifications().warn(&message)?,
                    "error" => self.api.notifications().error(&message)?,
                    _ => self.api.notifications().info(&message)?,
                }
                Ok(Value::Null)
            }
            other => Err(anyhow::anyhow!("unknown method \"{other}\"")),
        }
    }
}
