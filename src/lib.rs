//! Capability-scoped extension host for the Slatedock desktop workbench.
//!
//! The host installs, activates, and supervises third-party extensions:
//! it normalizes manifests and entitlements, drives the lifecycle state
//! machine, brokers every privileged operation through a per-extension
//! capability API, routes commands, coordinates slate (embedded UI panel)
//! lifecycles, persists per-extension settings and state, and speaks a
//! request-correlated message protocol designed to run across an
//! isolation boundary.
//!
//! The embedding application provides the rendering, editor, and terminal
//! surfaces through the collaborator traits in [`host`].

pub(crate) mod api;
pub(crate) mod api_fs;
pub(crate) mod api_git;
pub(crate) mod api_http;
pub(crate) mod api_shell;
pub(crate) mod commands;
pub(crate) mod error;
pub(crate) mod events;
pub(crate) mod host;
pub(crate) mod host_log;
pub(crate) mod manifest;
pub(crate) mod paths;
pub(crate) mod protocol;
pub(crate) mod registry;
pub(crate) mod settings;
pub(crate) mod slates;

pub use api::{
    ApiRequestHandler, CommandsApi, CompletionProvider, ConfigurationApi, ContextMenuApi,
    ContextMenuItem, DecorationProvider, Disposable, EditorApi, EventsApi, ExtensionApi,
    FileDecoration, FileDecorationsApi, Keybinding, KeybindingsApi, LogApi, NotificationsApi,
    PathsApi, PreloadScript, RegistrationTables, SettingsApi, SlatesApi, StateApi, StatusBarApi,
    StatusBarItem, TerminalApi, TerminalCommand, UiApi, UtilsApi,
};
pub use api_fs::WorkspaceApi;
pub use api_git::{GitApi, GitOutput, GitStatusEntry};
pub use api_http::{HttpApi, HttpResponse};
pub use api_shell::{ExecOutput, ShellApi};
pub use commands::{CommandHandler, CommandRouter, DEFAULT_COMMAND_TIMEOUT};
pub use error::{HostError, HostResult};
pub use events::{EventBus, EventCallback};
pub use host::{
    EditorHost, HeadlessSurfaces, HostOptions, InstallSource, LocalPathResolver, ModuleLoader,
    PackageResolver, PluginHost, PluginModule, TerminalHost, UiHost,
};
pub use host_log::{LogEntry, LogLevel, LogRingBuffer};
pub use manifest::{
    entitlements_to_permissions, normalize_manifest, Access, Capability, Contributes,
    Entitlements, Permissions, PluginManifest,
};
pub use paths::HostPaths;
pub use protocol::{
    ChannelModule, ExtensionBridge, ExtensionMessage, ExtensionTransport, HostMessage,
    IsolationChannel, PendingRequests, RequestHandler, Transport, REQUEST_TIMEOUT,
};
pub use registry::{InstalledPlugin, PluginRegistry, PluginState};
pub use settings::{KvStore, SettingSchemaEntry, SettingsCallback, SettingsStore};
pub use slates::{
    MountHandler, RenderCallback, RenderMessage, SlateConfig, SlateContext, SlateCoordinator,
    SlateEventHandler, SlateHooks, UnmountHandler, WindowSink,
};
