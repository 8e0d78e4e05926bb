//! Slate lifecycle coordination.
//!
//! A slate is an extension-contributed UI panel bound to file-path
//! patterns. The coordinator owns:
//! - the registration table (slate ID → patterns + lifecycle hooks),
//! - per-mount instances (uuid instance IDs, render queues, window
//!   association),
//! - render delivery, which is multi-channel and at-least-once per
//!   channel: a live callback when one is attached, a pending queue for
//!   windows that poll, and a window-addressed sink. Consumers
//!   de-duplicate by the per-instance sequence number.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::api::Disposable;
use crate::error::{HostError, HostResult};
use crate::settings::{KvStore, SettingsStore};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Registration payload for one slate.
#[derive(Debug, Clone)]
pub struct SlateConfig {
    /// Fully-qualified ID (`<plugin>.<id>`).
    pub id: String,
    pub plugin_name: String,
    /// File patterns: exact basename, `*.suffix`, or `**/`-prefixed.
    pub patterns: Vec<String>,
}

pub type MountHandler =
    Arc<dyn Fn(SlateContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type UnmountHandler = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;
pub type SlateEventHandler = Arc<dyn Fn(&str, &str, &Value) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle hooks supplied at registration. All optional.
#[derive(Default, Clone)]
pub struct SlateHooks {
    pub on_mount: Option<MountHandler>,
    pub on_unmount: Option<UnmountHandler>,
    pub on_event: Option<SlateEventHandler>,
}

/// Context handed to the mount handler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlateContext {
    pub instance_id: String,
    pub slate_id: String,
    pub file_path: String,
    /// Snapshot of the owning extension's persisted state.
    pub state: HashMap<String, Value>,
    /// Snapshot of the owning extension's settings.
    pub settings: HashMap<String, Value>,
}

/// One render delivery. `seq` increases monotonically per instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMessage {
    pub seq: u64,
    pub instance_id: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

pub type RenderCallback = Arc<dyn Fn(&RenderMessage) + Send + Sync>;

/// Window-addressed message relay, implemented by the embedding app.
pub trait WindowSink: Send + Sync {
    fn post(&self, window_id: &str, message: &RenderMessage);
}

struct RegisteredSlate {
    config: SlateConfig,
    hooks: SlateHooks,
}

struct SlateInstance {
    slate_id: String,
    plugin_name: String,
    file_path: String,
    window_id: Option<String>,
    pending: Mutex<Vec<RenderMessage>>,
    render_callback: Mutex<Option<RenderCallback>>,
    next_seq: AtomicU64,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct SlateCoordinator {
    /// Insertion-ordered: `find_slate_for_file` is first-match-wins.
    slates: RwLock<Vec<RegisteredSlate>>,
    instances: DashMap<String, Arc<SlateInstance>>,
    window_sink: RwLock<Option<Arc<dyn WindowSink>>>,
    settings: Arc<SettingsStore>,
    state: Arc<KvStore>,
}

impl SlateCoordinator {
    pub fn new(settings: Arc<SettingsStore>, state: Arc<KvStore>) -> Self {
        Self {
            slates: RwLock::new(Vec::new()),
            instances: DashMap::new(),
            window_sink: RwLock::new(None),
            settings,
            state,
        }
    }

    /// Install the embedding app's window relay.
    pub fn set_window_sink(&self, sink: Arc<dyn WindowSink>) {
        *self.window_sink.write() = Some(sink);
    }

    /// Register a slate. Disposal removes the registration and its hooks.
    pub fn register(self: &Arc<Self>, config: SlateConfig, hooks: SlateHooks) -> Disposable {
        let id = config.id.clone();
        self.slates.write().push(RegisteredSlate { config, hooks });
        tracing::debug!("[slates] Registered \"{id}\"");

        let coordinator = Arc::clone(self);
        Disposable::new(move || {
            coordinator.slates.write().retain(|s| s.config.id != id);
        })
    }

    /// First-match-wins scan of registered patterns against the file's
    /// basename.
    pub fn find_slate_for_file(&self, file_path: &str) -> Option<String> {
        let basename = basename_of(file_path);
        let slates = self.slates.read();
        for slate in slates.iter() {
            if slate.config.patterns.iter().any(|p| pattern_matches(p, basename)) {
                return Some(slate.config.id.clone());
            }
        }
        None
    }

    /// Mount a slate for a file. On handler failure the instance is torn
    /// down and the error re-thrown to the caller.
    pub async fn mount(
        &self,
        slate_id: &str,
        file_path: &str,
        render_callback: RenderCallback,
        window_id: Option<String>,
    ) -> HostResult<String> {
        let (plugin_name, on_mount) = {
            let slates = self.slates.read();
            let slate = slates
                .iter()
                .find(|s| s.config.id == slate_id)
                .ok_or_else(|| HostError::NotFound(format!("slate \"{slate_id}\"")))?;
            (slate.config.plugin_name.clone(), slate.hooks.on_mount.clone())
        };

        let instance_id = uuid::Uuid::new_v4().to_string();
        let instance = Arc::new(SlateInstance {
            slate_id: slate_id.to_string(),
            plugin_name: plugin_name.clone(),
            file_path: file_path.to_string(),
            window_id,
            pending: Mutex::new(Vec::new()),
            render_callback: Mutex::new(Some(render_callback)),
            next_seq: AtomicU64::new(1),
        });
        self.instances.insert(instance_id.clone(), instance);

        let context = SlateContext {
            instance_id: instance_id.clone(),
            slate_id: slate_id.to_string(),
            file_path: file_path.to_string(),
            state: self.state.snapshot(&plugin_name),
            settings: self.settings.snapshot(&plugin_name),
        };

        if let Some(handler) = on_mount {
            if let Err(e) = handler(context).await {
                self.instances.remove(&instance_id);
                return Err(HostError::Io(format!(
                    "Slate \"{slate_id}\" mount handler failed: {e}"
                )));
            }
        }

        Ok(instance_id)
    }

    /// Deliver rendered content on every subscribed channel.
    ///
    /// Unknown instances are a silent no-op: an unmount can race a late
    /// render and the content simply has nowhere to go.
    pub fn render(&self, instance_id: &str, html: &str, script: Option<String>) {
        let Some(instance) = self.instances.get(instance_id).map(|i| Arc::clone(&i)) else {
            return;
        };

        let message = RenderMessage {
            seq: instance.next_seq.fetch_add(1, Ordering::SeqCst),
            instance_id: instance_id.to_string(),
            html: html.to_string(),
            script,
        };

        // Channel 1: the live callback, when a window holds one
        if let Some(callback) = instance.render_callback.lock().as_ref() {
            callback(&message);
        }

        // Channel 2: the poll queue, always
        instance.pending.lock().push(message.clone());

        // Channel 3: the window relay, when the instance is window-bound
        if let Some(window_id) = &instance.window_id {
            if let Some(sink) = self.window_sink.read().as_ref() {
                sink.post(window_id, &message);
            }
        }
    }

    /// Drain the poll queue for a window that pulls rather than subscribes.
    pub fn take_pending(&self, instance_id: &str) -> Vec<RenderMessage> {
        self.instances
            .get(instance_id)
            .map(|i| std::mem::take(&mut *i.pending.lock()))
            .unwrap_or_default()
    }

    /// Attach a live render callback (window gained focus on the slate).
    pub fn attach_render_callback(&self, instance_id: &str, callback: RenderCallback) {
        if let Some(instance) = self.instances.get(instance_id) {
            *instance.render_callback.lock() = Some(callback);
        }
    }

    /// Detach the live render callback; pending-queue delivery continues.
    pub fn detach_render_callback(&self, instance_id: &str) {
        if let Some(instance) = self.instances.get(instance_id) {
            *instance.render_callback.lock() = None;
        }
    }

    /// Unmount an instance. Unmount-handler failures are logged, never
    /// thrown — instance teardown always completes.
    pub fn unmount(&self, instance_id: &str) {
        let Some((_, instance)) = self.instances.remove(instance_id) else {
            return;
        };

        let on_unmount = {
            let slates = self.slates.read();
            slates
                .iter()
                .find(|s| s.config.id == instance.slate_id)
                .and_then(|s| s.hooks.on_unmount.clone())
        };

        if let Some(handler) = on_unmount {
            if let Err(e) = handler(instance_id) {
                tracing::warn!(
                    "[slates] Unmount handler for \"{}\" failed: {e}",
                    instance.slate_id
                );
            }
        }
    }

    /// Route a UI-originated event to the owning extension's handler.
    /// Warns and no-ops when the instance or handler is unknown.
    pub fn send_event(&self, instance_id: &str, event_type: &str, payload: &Value) {
        let Some(instance) = self.instances.get(instance_id).map(|i| Arc::clone(&i)) else {
            tracing::warn!("[slates] Event for unknown instance \"{instance_id}\"");
            return;
        };

        let on_event = {
            let slates = self.slates.read();
            slates
                .iter()
                .find(|s| s.config.id == instance.slate_id)
                .and_then(|s| s.hooks.on_event.clone())
        };

        match on_event {
            Some(handler) => {
                if let Err(e) = handler(instance_id, event_type, payload) {
                    tracing::warn!(
                        "[slates] Event handler for \"{}\" failed: {e}",
                        instance.slate_id
                    );
                }
            }
            None => {
                tracing::warn!(
                    "[slates] Slate \"{}\" has no event handler for \"{event_type}\"",
                    instance.slate_id
                );
            }
        }
    }

    /// Teardown sweep: unmount every instance and drop every slate owned
    /// by a deactivating extension.
    pub fn remove_owned_by(&self, plugin: &str) {
        let instance_ids: Vec<String> = self
            .instances
            .iter()
            .filter(|e| e.value().plugin_name == plugin)
            .map(|e| e.key().clone())
            .collect();
        for id in instance_ids {
            self.unmount(&id);
        }
        self.slates.write().retain(|s| s.config.plugin_name != plugin);
    }

    pub fn slate_count(&self) -> usize {
        self.slates.read().len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn has_instance(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }
}

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

fn basename_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Match a slate pattern against a file basename.
/// Supported shapes: exact name, `*.suffix`, `**/`-prefixed variants of
/// either.
fn pattern_matches(pattern: &str, basename: &str) -> bool {
    let pattern = pattern.strip_prefix("**/").unwrap_or(pattern);
    if let Some(suffix) = pattern.strip_prefix('*') {
        basename.ends_with(suffix)
    } else {
        basename == pattern
    }
}
