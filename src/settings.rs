//! Per-extension settings and state persistence.
//!
//! Two independent JSON-backed stores share one implementation:
//! - `settings/{name}.json` — user-visible configuration, with schema
//!   defaults and change subscriptions;
//! - `state/{name}.json` — arbitrary key/value state an extension stashes
//!   between sessions.
//!
//! Both load eagerly for every registered extension at host startup and
//! persist synchronously on every mutation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::Disposable;
use crate::error::HostResult;
use crate::paths::{load_json_file, save_json_file};

type KvMap = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Key/value store
// ---------------------------------------------------------------------------

/// One file per extension, flat key → JSON value.
pub struct KvStore {
    dir: PathBuf,
    maps: DashMap<String, KvMap>,
}

impl KvStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, maps: DashMap::new() }
    }

    fn file_for(&self, plugin: &str) -> PathBuf {
        self.dir.join(format!("{plugin}.json"))
    }

    /// Eagerly load the store files for every registered extension.
    pub fn load_all<'a>(&self, plugins: impl Iterator<Item = &'a str>) {
        for plugin in plugins {
            let map: KvMap = load_json_file(&self.file_for(plugin));
            self.maps.insert(plugin.to_string(), map);
        }
    }

    pub fn get(&self, plugin: &str, key: &str) -> Option<Value> {
        self.maps.get(plugin).and_then(|m| m.get(key).cloned())
    }

    pub fn keys(&self, plugin: &str) -> Vec<String> {
        self.maps
            .get(plugin)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Set one key and persist. Returns whether the stored value changed.
    pub fn set(&self, plugin: &str, key: &str, value: Value) -> HostResult<bool> {
        let mut entry = self.maps.entry(plugin.to_string()).or_default();
        let changed = entry.get(key) != Some(&value);
        entry.insert(key.to_string(), value);
        let snapshot = entry.clone();
        drop(entry);
        save_json_file(&self.file_for(plugin), &snapshot)?;
        Ok(changed)
    }

    pub fn delete(&self, plugin: &str, key: &str) -> HostResult<()> {
        let Some(mut entry) = self.maps.get_mut(plugin) else {
            return Ok(());
        };
        if entry.remove(key).is_none() {
            return Ok(());
        }
        let snapshot = entry.clone();
        drop(entry);
        save_json_file(&self.file_for(plugin), &snapshot)
    }

    /// Full snapshot of one extension's map (used for slate contexts).
    pub fn snapshot(&self, plugin: &str) -> KvMap {
        self.maps.get(plugin).map(|m| m.clone()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Settings store: schema defaults + change subscriptions
// ---------------------------------------------------------------------------

/// One declared setting. `default` seeds the store when the key is absent;
/// an already-set value is never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingSchemaEntry {
    pub key: String,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub type SettingsCallback = Arc<dyn Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync>;

struct SettingsSubscription {
    id: u64,
    callback: SettingsCallback,
}

/// `KvStore` plus the settings-only behaviors: schema seeding and change
/// callbacks fired only when a value actually changed.
pub struct SettingsStore {
    kv: KvStore,
    subscribers: DashMap<String, Vec<SettingsSubscription>>,
    next_sub_id: std::sync::atomic::AtomicU64,
}

impl SettingsStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            kv: KvStore::new(dir),
            subscribers: DashMap::new(),
            next_sub_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn load_all<'a>(&self, plugins: impl Iterator<Item = &'a str>) {
        self.kv.load_all(plugins);
    }

    pub fn get(&self, plugin: &str, key: &str) -> Option<Value> {
        self.kv.get(plugin, key)
    }

    pub fn keys(&self, plugin: &str) -> Vec<String> {
        self.kv.keys(plugin)
    }

    pub fn snapshot(&self, plugin: &str) -> KvMap {
        self.kv.snapshot(plugin)
    }

    /// Persist and, only if the value actually changed, notify subscribers.
    /// Subscriber failures are logged, never propagated.
    pub fn set(&self, plugin: &str, key: &str, value: Value) -> HostResult<()> {
        let changed = self.kv.set(plugin, key, value.clone())?;
        if !changed {
            return Ok(());
        }

        let callbacks: Vec<SettingsCallback> = self
            .subscribers
            .get(plugin)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.callback)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            if let Err(e) = callback(key, &value) {
                tracing::warn!("[settings] \"{plugin}\" change listener failed: {e}");
            }
        }
        Ok(())
    }

    /// Seed declared defaults for missing keys, persisting once at the end.
    pub fn register_schema(&self, plugin: &str, schema: &[SettingSchemaEntry]) -> HostResult<()> {
        let mut seeded = false;
        for entry in schema {
            if self.kv.get(plugin, &entry.key).is_none() {
                // kv.set persists per key; acceptable since schemas are
                // small and registration happens once per activation.
                self.kv.set(plugin, &entry.key, entry.default.clone())?;
                seeded = true;
            }
        }
        if seeded {
            tracing::debug!("[settings] Seeded schema defaults for \"{plugin}\"");
        }
        Ok(())
    }

    /// Subscribe to changes of `plugin`'s settings.
    pub fn on_change(self: &Arc<Self>, plugin: &str, callback: SettingsCallback) -> Disposable {
        let id = self
            .next_sub_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.subscribers
            .entry(plugin.to_string())
            .or_default()
            .push(SettingsSubscription { id, callback });

        let store = Arc::clone(self);
        let plugin = plugin.to_string();
        Disposable::new(move || {
            if let Some(mut subs) = store.subscribers.get_mut(&plugin) {
                subs.retain(|s| s.id != id);
            }
        })
    }

    /// Drop all change subscriptions owned by a deactivating extension.
    pub fn remove_owned_by(&self, plugin: &str) {
        self.subscribers.remove(plugin);
    }
}
