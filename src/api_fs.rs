//! Workspace filesystem API for extensions.
//!
//! Sandboxed read, write, list, and watch operations restricted to paths
//! within the workspace root. Reads require the `filesystem.read`
//! entitlement, writes `filesystem.write`; every path is canonicalized and
//! prefix-checked before any I/O happens.

use std::path::PathBuf;
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::json;

use crate::api::{Disposable, ExtensionApi, WatcherEntry};
use crate::error::{HostError, HostResult};
use crate::manifest::Capability;
use crate::paths::validate_within;

/// Maximum file size readable through the API (10 MB).
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub struct WorkspaceApi {
    pub(crate) api: ExtensionApi,
}

impl WorkspaceApi {
    fn resolve(&self, raw: &str) -> HostResult<PathBuf> {
        validate_within(raw, &self.api.host.workspace_root).map_err(|e| match e {
            // Re-tag bare sandbox violations with the caller's identity
            HostError::PermissionDenied { capability, .. } => HostError::PermissionDenied {
                plugin: self.api.plugin.clone(),
                capability,
            },
            other => other,
        })
    }

    /// Read a file as UTF-8 text. Enforces the 10 MB size limit.
    pub fn read_file(&self, path: &str) -> HostResult<String> {
        self.api.check(Capability::FilesystemRead)?;
        let canonical = self.resolve(path)?;

        let metadata = std::fs::metadata(&canonical)
            .map_err(|e| HostError::io("Failed to stat file", e))?;
        if !metadata.is_file() {
            return Err(HostError::Io("Path is not a file".into()));
        }
        if metadata.len() > MAX_FILE_SIZE {
            return Err(HostError::Io(format!(
                "File exceeds maximum size ({} bytes > {MAX_FILE_SIZE} bytes)",
                metadata.len()
            )));
        }

        std::fs::read_to_string(&canonical).map_err(|e| HostError::io("Failed to read file", e))
    }

    /// Write a file, creating parent directories as needed.
    pub fn write_file(&self, path: &str, contents: &str) -> HostResult<()> {
        self.api.check(Capability::FilesystemWrite)?;
        let canonical = self.resolve(path)?;

        if let Some(parent) = canonical.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HostError::io("Failed to create directory", e))?;
        }
        std::fs::write(&canonical, contents).map_err(|e| HostError::io("Failed to write file", e))
    }

    /// List filenames in a directory, optionally filtered by a glob
    /// pattern. Returns filenames only, sorted.
    pub fn list_directory(&self, path: &str, pattern: Option<&str>) -> HostResult<Vec<String>> {
        self.api.check(Capability::FilesystemRead)?;
        let canonical = self.resolve(path)?;

        if !canonical.is_dir() {
            return Err(HostError::Io("Path is not a directory".into()));
        }

        let glob_pattern = pattern
            .map(|p| glob::Pattern::new(p).map_err(|e| HostError::io("Invalid glob pattern", e)))
            .transpose()?;

        let entries = std::fs::read_dir(&canonical)
            .map_err(|e| HostError::io("Failed to read directory", e))?;

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(ref pat) = glob_pattern {
                if !pat.matches(&name) {
                    continue;
                }
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }

    /// Watch a path for changes. Batched change events are published on
    /// the event bus as `fs.change.{plugin}`; the returned handle (or
    /// extension teardown) stops the watcher.
    pub fn watch(&self, path: &str, recursive: bool, debounce_ms: u64) -> HostResult<Disposable> {
        self.api.check(Capability::FilesystemRead)?;
        let canonical = self.resolve(path)?;

        let watch_id = uuid::Uuid::new_v4().to_string();
        let event_name = format!("fs.change.{}", self.api.plugin);
        let debounce = std::time::Duration::from_millis(debounce_ms.max(50));
        let mode = if recursive { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };

        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())
            .map_err(|e| HostError::io("Failed to create watcher", e))?;
        watcher
            .watch(&canonical, mode)
            .map_err(|e| HostError::io("Failed to watch path", e))?;

        self.api.host.registrations.watchers.insert(
            watch_id.clone(),
            WatcherEntry { owner: self.api.plugin.clone(), watcher },
        );

        // Debounce thread: exits when the watcher is dropped and the
        // channel closes.
        let events = Arc::clone(&self.api.host.events);
        std::thread::spawn(move || {
            debounce_loop(rx, debounce, &event_name, &events);
        });

        let host = Arc::clone(&self.api.host);
        Ok(Disposable::new(move || {
            host.registrations.watchers.remove(&watch_id);
        }))
    }
}

// ---------------------------------------------------------------------------
// Debounce loop
// ---------------------------------------------------------------------------

/// Collect notify events and publish batched change events after a quiet
/// period.
fn debounce_loop(
    rx: std::sync::mpsc::Receiver<notify::Result<Event>>,
    debounce: std::time::Duration,
    event_name: &str,
    events: &crate::events::EventBus,
) {
    use std::collections::HashMap;

    loop {
        // Block until first event (or channel close)
        let first = match rx.recv() {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                tracing::warn!("[api_fs] Watcher error: {e}");
                continue;
            }
            Err(_) => break, // Channel closed — watcher was dropped
        };

        let mut changes_by_path: HashMap<PathBuf, &'static str> = HashMap::new();
        classify_event(&first, &mut changes_by_path);

        let deadline = std::time::Instant::now() + debounce;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(Ok(event)) => classify_event(&event, &mut changes_by_path),
                Ok(Err(e)) => tracing::warn!("[api_fs] Watcher error: {e}"),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => break,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }

        let changes: Vec<serde_json::Value> = changes_by_path
            .into_iter()
            .map(|(path, kind)| {
                json!({ "type": kind, "path": path.to_string_lossy() })
            })
            .collect();

        if !changes.is_empty() {
            events.emit(event_name, &serde_json::Value::Array(changes));
        }
    }
}

/// Map a notify event to a simplified type string and collect by path.
fn classify_event(event: &Event, map: &mut std::collections::HashMap<PathBuf, &'static str>) {
    let kind = match event.kind {
        notify::EventKind::Create(_) => "create",
        notify::EventKind::Modify(_) => "modify",
        notify::EventKind::Remove(_) => "delete",
        _ => return,
    };

    for path in &event.paths {
        map.insert(path.clone(), kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn classify_create_event() {
        let mut map = std::collections::HashMap::new();
        let event = Event {
            kind: notify::EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/test/file.txt")],
            attrs: Default::default(),
        };
        classify_event(&event, &mut map);
        assert_eq!(map.get(Path::new("/test/file.txt")).copied(), Some("create"));
    }

    #[test]
    fn classify_ignores_access_event() {
        let mut map = std::collections::HashMap::new();
        let event = Event {
            kind: notify::EventKind::Access(notify::event::AccessKind::Read),
            paths: vec![PathBuf::from("/test/file.txt")],
            attrs: Default::default(),
        };
        classify_event(&event, &mut map);
        assert!(map.is_empty());
    }

    #[test]
    fn classify_last_event_wins() {
        let mut map = std::collections::HashMap::new();
        let create = Event {
            kind: notify::EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/test/file.txt")],
            attrs: Default::default(),
        };
        let modify = Event {
            kind: notify::EventKind::Modify(notify::event::ModifyKind::Data(
                notify::event::DataChange::Content,
            )),
            paths: vec![PathBuf::from("/test/file.txt")],
            attrs: Default::default(),
        };
        classify_event(&create, &mut map);
        classify_event(&modify, &mut map);
        assert_eq!(map.get(Path::new("/test/file.txt")).copied(), Some("modify"));
    }
}
