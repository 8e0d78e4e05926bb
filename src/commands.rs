//! Namespaced command router.
//!
//! Commands are registered under fully-qualified IDs (`<plugin>.<id>`) and
//! tagged with their owning extension, so dispatch can refuse commands
//! whose owner is no longer active and teardown can sweep every mapping a
//! deactivating extension left behind — including ones registered
//! dynamically inside `activate()`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::api::Disposable;
use crate::error::{HostError, HostResult};

/// Default budget for one command invocation. Mirrors the cross-boundary
/// request timeout so an extension handler that never resolves cannot hang
/// its caller indefinitely.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub type CommandHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

struct CommandEntry {
    owner: String,
    handler: CommandHandler,
}

/// Shared, host-owned command table.
pub struct CommandRouter {
    entries: DashMap<String, CommandEntry>,
    timeout: Duration,
}

impl CommandRouter {
    pub fn new(timeout: Duration) -> Self {
        Self { entries: DashMap::new(), timeout }
    }

    /// Qualify a bare ID with its owner's namespace. IDs that already
    /// carry a dot are taken as-is.
    pub fn qualify(owner: &str, id: &str) -> String {
        if id.contains('.') {
            id.to_string()
        } else {
            format!("{owner}.{id}")
        }
    }

    /// Register a command. Re-registering your own ID replaces the handler;
    /// colliding with a *different* extension's ID is an error.
    pub fn register(
        self: &Arc<Self>,
        owner: &str,
        id: &str,
        handler: CommandHandler,
    ) -> HostResult<Disposable> {
        let full_id = Self::qualify(owner, id);

        {
            let entry = self.entries.entry(full_id.clone());
            match entry {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    if occupied.get().owner != owner {
                        return Err(HostError::AlreadyRegistered {
                            command: full_id,
                            owner: occupied.get().owner.clone(),
                        });
                    }
                    occupied.insert(CommandEntry { owner: owner.to_string(), handler });
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(CommandEntry { owner: owner.to_string(), handler });
                }
            }
        }

        tracing::debug!("[commands] Registered \"{full_id}\"");

        let router = Arc::clone(self);
        let owner = owner.to_string();
        let disposer_id = full_id;
        Ok(Disposable::new(move || {
            // Remove only if still owned by the registrant — a later
            // owner-replacing registration must not be clobbered.
            router
                .entries
                .remove_if(&disposer_id, |_, entry| entry.owner == owner);
        }))
    }

    /// Dispatch a command. `is_active` is the host's view of which
    /// extensions are currently running.
    pub async fn execute(
        &self,
        id: &str,
        args: Vec<Value>,
        is_active: impl Fn(&str) -> bool,
    ) -> HostResult<Value> {
        let (owner, handler) = {
            let entry = self
                .entries
                .get(id)
                .ok_or_else(|| HostError::NotFound(format!("command \"{id}\"")))?;
            (entry.owner.clone(), Arc::clone(&entry.handler))
        };

        if !is_active(&owner) {
            return Err(HostError::NotActive(owner));
        }

        let future = handler(args);
        match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(HostError::Io(format!("Command \"{id}\" failed: {e}"))),
            Err(_) => Err(HostError::Timeout(format!(
                "Command \"{id}\" did not resolve within {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// All command IDs owned by `plugin`.
    pub fn ids_owned_by(&self, plugin: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.value().owner == plugin)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Teardown sweep for a deactivating extension.
    pub fn remove_owned_by(&self, plugin: &str) {
        self.entries.retain(|_, entry| entry.owner != plugin);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}
