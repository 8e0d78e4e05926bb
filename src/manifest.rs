//! Extension manifest parsing, validation, and entitlement normalization.
//!
//! Extensions ship a `manifest.json` in their package root. Two permission
//! models coexist:
//! - structured `entitlements` (the current model): per-area sections with
//!   boolean flags and an optional human-readable reason, shown to the user
//!   at install time and checked by the host on every privileged call;
//! - legacy flat `permissions` (coarse `none|readonly|readwrite` grants),
//!   still accepted from older manifests.
//!
//! `normalize_manifest` reconciles the two: declared entitlements are
//! authoritative and the legacy shape is derived from them; manifests with
//! neither get a maximally restrictive default. Entitlements are declarative
//! only — the host enforces them at its own API boundary, nothing stops an
//! extension from *asking*.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HostError, HostResult};
use crate::paths::is_path_escape;

/// Conventional entry point used when a manifest omits `main`.
pub const DEFAULT_ENTRY: &str = "main.js";

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// A normalized extension manifest. All optional fields are defaulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// JS entry point, relative to the package root.
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub contributes: Contributes,
    #[serde(default)]
    pub entitlements: Entitlements,
    /// Legacy coarse grants. Derived from `entitlements` when those are
    /// declared; authoritative only for legacy manifests.
    #[serde(default)]
    pub permissions: Permissions,
    /// `["*"]` means "activate at startup".
    #[serde(default = "default_activation_events")]
    pub activation_events: Vec<String>,
}

fn default_activation_events() -> Vec<String> {
    vec!["*".to_string()]
}

/// Declared contributions: commands and slates the extension intends to
/// register. Dynamic registrations during `activate()` are equally valid;
/// this block exists for display and eager indexing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contributes {
    #[serde(default)]
    pub commands: Vec<CommandContribution>,
    #[serde(default)]
    pub slates: Vec<SlateContribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandContribution {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlateContribution {
    pub id: String,
    /// File patterns the slate binds to: exact basename, `*.suffix`, or
    /// `**/`-prefixed.
    #[serde(default)]
    pub patterns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Entitlements
// ---------------------------------------------------------------------------

macro_rules! entitlement_section {
    ($name:ident { $($flag:ident),+ $(,)? } $($extra_field:tt)*) => {
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            $(
                #[serde(default)]
                pub $flag: bool,
            )+
            /// Human-readable justification shown at install time.
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub reason: Option<String>,
            $($extra_field)*
        }
    };
}

entitlement_section!(FilesystemEntitlement { read, write, full_access });
entitlement_section!(NetworkEntitlement { internet, local }
    /// URL prefix patterns the extension may fetch (empty = any, once
    /// `internet` is granted).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_urls: Vec<String>,
);
entitlement_section!(ProcessEntitlement { spawn });
entitlement_section!(TerminalEntitlement { read, write });
entitlement_section!(SystemEntitlement { info, settings });
entitlement_section!(WebviewEntitlement { create });
entitlement_section!(AiEntitlement { completions });
entitlement_section!(SensitiveEntitlement { clipboard, credentials });
entitlement_section!(UiEntitlement {
    notifications,
    status_bar,
    context_menu,
    dialogs,
    slates,
    decorations,
});
entitlement_section!(EditorEntitlement { read, write });
entitlement_section!(KeybindingsEntitlement { register });

/// Structured capability declarations. `declared` records whether the
/// manifest carried an `entitlements` block at all — legacy manifests
/// without one are enforced through `Permissions` instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlements {
    /// Whether the manifest carried an `entitlements` block at all. Set by
    /// normalization and persisted with the registry record so enforcement
    /// survives a host restart.
    #[serde(default)]
    pub declared: bool,
    #[serde(default)]
    pub filesystem: FilesystemEntitlement,
    #[serde(default)]
    pub network: NetworkEntitlement,
    #[serde(default)]
    pub process: ProcessEntitlement,
    #[serde(default)]
    pub terminal: TerminalEntitlement,
    #[serde(default)]
    pub system: SystemEntitlement,
    #[serde(default)]
    pub webview: WebviewEntitlement,
    #[serde(default)]
    pub ai: AiEntitlement,
    #[serde(default)]
    pub sensitive: SensitiveEntitlement,
    #[serde(default)]
    pub ui: UiEntitlement,
    #[serde(default)]
    pub editor: EditorEntitlement,
    #[serde(default)]
    pub keybindings: KeybindingsEntitlement,
}

// ---------------------------------------------------------------------------
// Legacy permissions
// ---------------------------------------------------------------------------

/// Coarse grant level used by the legacy permission model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    None,
    Readonly,
    Readwrite,
    /// Used by boolean-ish resources (network, process, ui).
    Allow,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::Readonly | Access::Readwrite | Access::Allow)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Readwrite | Access::Allow)
    }
}

/// Legacy flat permission set. One coarse grant per resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default)]
    pub fs: Access,
    #[serde(default)]
    pub network: Access,
    #[serde(default)]
    pub process: Access,
    #[serde(default)]
    pub terminal: Access,
    #[serde(default)]
    pub system: Access,
    #[serde(default)]
    pub clipboard: Access,
    #[serde(default)]
    pub ui: Access,
    #[serde(default)]
    pub editor: Access,
    #[serde(default)]
    pub keybindings: Access,
}

impl Permissions {
    /// Maximally restrictive set, synthesized when a manifest declares
    /// neither entitlements nor permissions.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Map structured entitlements onto the legacy permission shape.
///
/// Lossy by design (legacy grants are coarser) and total: unknown or
/// missing sections map to no access, nothing here can fail. Because the
/// output depends only on the input flags, applying it twice yields the
/// same permissions.
pub fn entitlements_to_permissions(ents: &Entitlements) -> Permissions {
    Permissions {
        fs: if ents.filesystem.write || ents.filesystem.full_access {
            Access::Readwrite
        } else if ents.filesystem.read {
            Access::Readonly
        } else {
            Access::None
        },
        network: if ents.network.internet { Access::Allow } else { Access::None },
        process: if ents.process.spawn { Access::Allow } else { Access::None },
        terminal: if ents.terminal.write {
            Access::Readwrite
        } else if ents.terminal.read {
            Access::Readonly
        } else {
            Access::None
        },
        system: if ents.system.settings {
            Access::Readwrite
        } else if ents.system.info {
            Access::Readonly
        } else {
            Access::None
        },
        clipboard: if ents.sensitive.clipboard { Access::Readwrite } else { Access::None },
        ui: if ents.ui.notifications
            || ents.ui.status_bar
            || ents.ui.context_menu
            || ents.ui.dialogs
            || ents.ui.slates
            || ents.ui.decorations
        {
            Access::Allow
        } else {
            Access::None
        },
        editor: if ents.editor.write {
            Access::Readwrite
        } else if ents.editor.read {
            Access::Readonly
        } else {
            Access::None
        },
        keybindings: if ents.keybindings.register { Access::Allow } else { Access::None },
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Fine-grained capability checked at each privileged API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    FilesystemRead,
    FilesystemWrite,
    NetworkInternet,
    ProcessSpawn,
    TerminalRead,
    TerminalWrite,
    SystemInfo,
    SystemSettings,
    WebviewCreate,
    AiCompletions,
    Clipboard,
    Credentials,
    UiNotifications,
    UiStatusBar,
    UiContextMenu,
    UiDialogs,
    UiSlates,
    UiDecorations,
    EditorRead,
    EditorWrite,
    KeybindingsRegister,
}

impl Capability {
    /// The dotted name shown in `PermissionDenied` errors and install
    /// prompts, e.g. `process.spawn`.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::FilesystemRead => "filesystem.read",
            Capability::FilesystemWrite => "filesystem.write",
            Capability::NetworkInternet => "network.internet",
            Capability::ProcessSpawn => "process.spawn",
            Capability::TerminalRead => "terminal.read",
            Capability::TerminalWrite => "terminal.write",
            Capability::SystemInfo => "system.info",
            Capability::SystemSettings => "system.settings",
            Capability::WebviewCreate => "webview.create",
            Capability::AiCompletions => "ai.completions",
            Capability::Clipboard => "sensitive.clipboard",
            Capability::Credentials => "sensitive.credentials",
            Capability::UiNotifications => "ui.notifications",
            Capability::UiStatusBar => "ui.statusBar",
            Capability::UiContextMenu => "ui.contextMenu",
            Capability::UiDialogs => "ui.dialogs",
            Capability::UiSlates => "ui.slates",
            Capability::UiDecorations => "ui.decorations",
            Capability::EditorRead => "editor.read",
            Capability::EditorWrite => "editor.write",
            Capability::KeybindingsRegister => "keybindings.register",
        }
    }

    fn granted_by_entitlements(self, e: &Entitlements) -> bool {
        match self {
            Capability::FilesystemRead => e.filesystem.read || e.filesystem.write || e.filesystem.full_access,
            Capability::FilesystemWrite => e.filesystem.write || e.filesystem.full_access,
            Capability::NetworkInternet => e.network.internet,
            Capability::ProcessSpawn => e.process.spawn,
            Capability::TerminalRead => e.terminal.read || e.terminal.write,
            Capability::TerminalWrite => e.terminal.write,
            Capability::SystemInfo => e.system.info || e.system.settings,
            Capability::SystemSettings => e.system.settings,
            Capability::WebviewCreate => e.webview.create,
            Capability::AiCompletions => e.ai.completions,
            Capability::Clipboard => e.sensitive.clipboard,
            Capability::Credentials => e.sensitive.credentials,
            Capability::UiNotifications => e.ui.notifications,
            Capability::UiStatusBar => e.ui.status_bar,
            Capability::UiContextMenu => e.ui.context_menu,
            Capability::UiDialogs => e.ui.dialogs,
            Capability::UiSlates => e.ui.slates,
            Capability::UiDecorations => e.ui.decorations,
            Capability::EditorRead => e.editor.read || e.editor.write,
            Capability::EditorWrite => e.editor.write,
            Capability::KeybindingsRegister => e.keybindings.register,
        }
    }

    fn granted_by_permissions(self, p: &Permissions) -> bool {
        match self {
            Capability::FilesystemRead => p.fs.readable(),
            Capability::FilesystemWrite => p.fs.writable(),
            Capability::NetworkInternet => p.network.readable(),
            Capability::ProcessSpawn => p.process.readable(),
            Capability::TerminalRead => p.terminal.readable(),
            Capability::TerminalWrite => p.terminal.writable(),
            Capability::SystemInfo => p.system.readable(),
            Capability::SystemSettings => p.system.writable(),
            // Webview, AI, and credential access never existed in the
            // legacy model; legacy manifests simply do not get them.
            Capability::WebviewCreate => false,
            Capability::AiCompletions => false,
            Capability::Credentials => false,
            Capability::Clipboard => p.clipboard.writable(),
            Capability::UiNotifications
            | Capability::UiStatusBar
            | Capability::UiContextMenu
            | Capability::UiDialogs
            | Capability::UiSlates
            | Capability::UiDecorations => p.ui.readable(),
            Capability::EditorRead => p.editor.readable(),
            Capability::EditorWrite => p.editor.writable(),
            Capability::KeybindingsRegister => p.keybindings.readable(),
        }
    }
}

impl PluginManifest {
    /// Whether this manifest grants `cap`. Declared entitlements are
    /// authoritative; legacy manifests fall back to the coarse grants.
    pub fn grants(&self, cap: Capability) -> bool {
        if self.entitlements.declared {
            cap.granted_by_entitlements(&self.entitlements)
        } else {
            cap.granted_by_permissions(&self.permissions)
        }
    }

    /// Activate at host startup?
    pub fn activates_always(&self) -> bool {
        self.activation_events.iter().any(|e| e == "*")
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Parse and normalize a raw descriptor into a validated manifest.
///
/// - `name` is required; everything else defaults.
/// - `main` defaults to `main.js` and must not escape the package dir.
/// - Declared entitlements overwrite the legacy permission shape.
/// - Neither model present → maximally restrictive defaults.
pub fn normalize_manifest(raw: &Value) -> HostResult<PluginManifest> {
    let mut manifest: PluginManifest = serde_json::from_value(raw.clone())
        .map_err(|e| HostError::Validation(format!("failed to parse manifest: {e}")))?;

    if manifest.name.is_empty() {
        return Err(HostError::Validation("package name is required".into()));
    }
    if manifest.name.starts_with('.') || is_path_escape(&manifest.name) {
        return Err(HostError::Validation(format!(
            "package name \"{}\" is not a valid directory name",
            manifest.name
        )));
    }
    if manifest.version.is_empty() {
        return Err(HostError::Validation("version is empty".into()));
    }

    if manifest.display_name.is_empty() {
        manifest.display_name = manifest.name.clone();
    }
    if manifest.main.is_empty() {
        manifest.main = DEFAULT_ENTRY.to_string();
    }
    if is_path_escape(&manifest.main) {
        return Err(HostError::Validation(format!(
            "main \"{}\" attempts path traversal",
            manifest.main
        )));
    }
    if manifest.activation_events.is_empty() {
        manifest.activation_events = default_activation_events();
    }

    let entitlements_declared = raw.get("entitlements").is_some_and(|v| !v.is_null());
    let permissions_declared = raw.get("permissions").is_some_and(|v| !v.is_null());

    manifest.entitlements.declared = entitlements_declared;
    if entitlements_declared {
        // New model wins; keep the legacy shape in sync for older
        // enforcement paths and display code.
        manifest.permissions = entitlements_to_permissions(&manifest.entitlements);
    } else if !permissions_declared {
        manifest.permissions = Permissions::none();
    }

    Ok(manifest)
}
