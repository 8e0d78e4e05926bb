//! Host ↔ extension message protocol.
//!
//! The wire contract an isolated extension runtime speaks. Today's default
//! loader runs modules in-process, but everything that crosses this module
//! is JSON-serializable and transport-agnostic: an out-of-process runtime
//! only needs to implement `Transport` for its pipe.
//!
//! Correlation: every `request` carries a host-generated uuid; the pending
//! table holds the waiting side and rejects with `Timeout` after a fixed
//! budget. Whichever path fires first — response or timeout — removes the
//! entry, so a late `response` is a no-op rather than a double-resolve.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{HostError, HostResult};
use crate::host_log::{LogLevel, LogRingBuffer};

/// Budget for one correlated request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Messages the host sends into an extension runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    #[serde(rename_all = "camelCase")]
    Activate { plugin_name: String, config: Value },
    Deactivate {},
    #[serde(rename_all = "camelCase")]
    Command { command_id: String, args: Vec<Value> },
    #[serde(rename_all = "camelCase")]
    Event { event_type: String, payload: Value },
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Messages an extension runtime sends back to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtensionMessage {
    Ready {},
    Activated {},
    Deactivated {},
    Error { error: String },
    #[serde(rename_all = "camelCase")]
    Request { request_id: String, method: String, params: Value },
    #[serde(rename_all = "camelCase")]
    Log {
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
    },
}

/// Outbound half of the boundary, implemented per runtime flavor
/// (in-process loopback, worker pipe, child-process stdio, ...).
pub trait Transport: Send + Sync {
    fn send(&self, message: HostMessage) -> HostResult<()>;
}

/// Host-side dispatcher for extension-initiated `request` messages.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, plugin: &str, method: &str, params: Value) -> anyhow::Result<Value>;
}

// ---------------------------------------------------------------------------
// Pending-request table
// ---------------------------------------------------------------------------

type PendingSender = oneshot::Sender<Result<Value, String>>;

/// Correlation table for in-flight requests. Entries are removed exactly
/// once, by whichever of response/timeout wins.
pub struct PendingRequests {
    table: DashMap<String, PendingSender>,
    timeout: Duration,
}

impl PendingRequests {
    pub fn new(timeout: Duration) -> Self {
        Self { table: DashMap::new(), timeout }
    }

    /// Allocate a correlation ID and park a waiter under it.
    pub fn register(&self) -> (String, oneshot::Receiver<Result<Value, String>>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.table.insert(id.clone(), tx);
        (id, rx)
    }

    /// Complete a request. Returns false when the entry is already gone
    /// (timed out or double response) — the caller treats that as a no-op.
    pub fn resolve(&self, request_id: &str, result: Result<Value, String>) -> bool {
        match self.table.remove(request_id) {
            Some((_, tx)) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Await the parked waiter, enforcing the timeout budget.
    pub async fn wait(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<Result<Value, String>>,
    ) -> HostResult<Value> {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(HostError::Io(message)),
            // Sender dropped without a reply — treat like a failed runtime
            Ok(Err(_)) => Err(HostError::Io(format!(
                "Request {request_id} dropped without a response"
            ))),
            Err(_) => {
                // Remove the entry so a late response finds nothing
                self.table.remove(request_id);
                Err(HostError::Timeout(format!(
                    "Request {request_id} unanswered after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

type LifecycleAck = oneshot::Sender<Result<(), String>>;

/// Host-side endpoint of the isolation boundary, one per extension.
///
/// Outbound messages go through the `Transport`; the embedding runtime
/// pumps inbound `ExtensionMessage`s into `handle_incoming`.
pub struct IsolationChannel {
    plugin: String,
    transport: Arc<dyn Transport>,
    /// One lifecycle transition in flight at a time (activate/deactivate
    /// are serialized by the lifecycle manager).
    lifecycle_ack: Mutex<Option<LifecycleAck>>,
    request_handler: Mutex<Option<Arc<dyn RequestHandler>>>,
    log: Arc<LogRingBuffer>,
    timeout: Duration,
}

impl IsolationChannel {
    pub fn new(plugin: &str, transport: Arc<dyn Transport>, log: Arc<LogRingBuffer>) -> Self {
        Self::with_timeout(plugin, transport, log, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        plugin: &str,
        transport: Arc<dyn Transport>,
        log: Arc<LogRingBuffer>,
        timeout: Duration,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            transport,
            lifecycle_ack: Mutex::new(None),
            request_handler: Mutex::new(None),
            log,
            timeout,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.request_handler.lock() = Some(handler);
    }

    pub fn send(&self, message: HostMessage) -> HostResult<()> {
        self.transport.send(message)
    }

    /// Send a lifecycle message and wait for the matching ack
    /// (`activated`/`deactivated`) or an `error`.
    pub(crate) async fn lifecycle_roundtrip(&self, message: HostMessage, what: &str) -> HostResult<()> {
        let (tx, rx) = oneshot::channel();
        *self.lifecycle_ack.lock() = Some(tx);
        if let Err(e) = self.transport.send(message) {
            self.lifecycle_ack.lock().take();
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(HostError::Io(message)),
            Ok(Err(_)) => Err(HostError::Io(format!(
                "Extension \"{}\" runtime went away during {what}",
                self.plugin
            ))),
            Err(_) => {
                self.lifecycle_ack.lock().take();
                Err(HostError::Timeout(format!(
                    "Extension \"{}\" did not acknowledge {what} within {}s",
                    self.plugin,
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Pump one inbound message. The embedding runtime calls this for
    /// every envelope read off the boundary.
    pub async fn handle_incoming(&self, message: ExtensionMessage) {
        match message {
            ExtensionMessage::Ready {} => {
                tracing::debug!("[protocol] \"{}\" runtime ready", self.plugin);
            }
            ExtensionMessage::Activated {} => {
                if let Some(ack) = self.lifecycle_ack.lock().take() {
                    let _ = ack.send(Ok(()));
                }
            }
            ExtensionMessage::Deactivated {} => {
                if let Some(ack) = self.lifecycle_ack.lock().take() {
                    let _ = ack.send(Ok(()));
                }
            }
            ExtensionMessage::Error { error } => {
                tracing::warn!("[protocol] \"{}\" reported: {error}", self.plugin);
                if let Some(ack) = self.lifecycle_ack.lock().take() {
                    let _ = ack.send(Err(error));
                }
            }
            ExtensionMessage::Request { request_id, method, params } => {
                let handler = self.request_handler.lock().clone();
                let reply = match handler {
                    Some(handler) => handler
                        .handle(&self.plugin, &method, params)
                        .await
                        .map_err(|e| e.to_string()),
                    None => Err(format!("no handler for method \"{method}\"")),
                };
                let response = match reply {
                    Ok(result) => HostMessage::Response {
                        request_id,
                        result: Some(result),
                        error: None,
                    },
                    Err(error) => HostMessage::Response {
                        request_id,
                        result: None,
                        error: Some(error),
                    },
                };
                if let Err(e) = self.transport.send(response) {
                    tracing::warn!("[protocol] Failed to send response to \"{}\": {e}", self.plugin);
                }
            }
            ExtensionMessage::Log { level, message, args } => {
                if args.is_empty() {
                    self.log.push(level, &self.plugin, &message);
                } else {
                    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    self.log
                        .push(level, &self.plugin, &format!("{message} {}", rendered.join(" ")));
                }
            }
        }
    }

}

// ---------------------------------------------------------------------------
// Extension-side bridge
// ---------------------------------------------------------------------------

/// Inbound half of the boundary as seen from the host: the extension
/// runtime pushes envelopes through this.
pub trait ExtensionTransport: Send + Sync {
    fn send(&self, message: ExtensionMessage) -> HostResult<()>;
}

/// The extension-side half of the protocol: proxies API calls as
/// correlated `request` envelopes and resolves `response`s. An isolated
/// runtime links this (or a reimplementation in its own language) against
/// its transport; the v1 in-process runtime uses it directly.
pub struct ExtensionBridge {
    transport: Arc<dyn ExtensionTransport>,
    pending: Arc<PendingRequests>,
}

impl ExtensionBridge {
    pub fn new(transport: Arc<dyn ExtensionTransport>) -> Self {
        Self::with_timeout(transport, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(transport: Arc<dyn ExtensionTransport>, timeout: Duration) -> Self {
        Self { transport, pending: Arc::new(PendingRequests::new(timeout)) }
    }

    /// Call a host method across the boundary. Rejects with `Timeout`
    /// exactly once if no matching `response` arrives within the budget.
    pub async fn request(&self, method: &str, params: Value) -> HostResult<Value> {
        let (id, rx) = self.pending.register();
        self.transport.send(ExtensionMessage::Request {
            request_id: id.clone(),
            method: method.to_string(),
            params,
        })?;
        self.pending.wait(&id, rx).await
    }

    /// Pump one host→extension message. `response` envelopes resolve the
    /// matching pending request; everything else is handed back to the
    /// caller's runtime to act on.
    pub fn handle_host_message(&self, message: HostMessage) -> Option<HostMessage> {
        match message {
            HostMessage::Response { request_id, result, error } => {
                let outcome = match error {
                    Some(e) => Err(e),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                if !self.pending.resolve(&request_id, outcome) {
                    tracing::debug!("[protocol] Late response for {request_id} ignored");
                }
                None
            }
            other => Some(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel-backed module
// ---------------------------------------------------------------------------

use crate::api::{ApiRequestHandler, ExtensionApi};
use crate::host::PluginModule;

/// A `PluginModule` whose real implementation lives on the far side of an
/// `IsolationChannel`. Activation wires the channel's request dispatcher
/// to the extension's capability-checked API, then drives the remote
/// lifecycle with acked round-trips.
pub struct ChannelModule {
    channel: Arc<IsolationChannel>,
}

impl ChannelModule {
    pub fn new(channel: Arc<IsolationChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl PluginModule for ChannelModule {
    async fn activate(&self, api: ExtensionApi) -> anyhow::Result<()> {
        let plugin = self.channel.plugin().to_string();
        let config = serde_json::json!({
            "settings": api.settings().snapshot(),
        });
        self.channel
            .set_request_handler(Arc::new(ApiRequestHandler::new(api)));
        self.channel
            .lifecycle_roundtrip(
                HostMessage::Activate { plugin_name: plugin, config },
                "activate",
            )
            .await?;
        Ok(())
    }

    async fn deactivate(&self) -> anyhow::Result<()> {
        self.channel
            .lifecycle_roundtrip(HostMessage::Deactivate {}, "deactivate")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NullTransport;
    impl Transport for NullTransport {
        fn send(&self, _message: HostMessage) -> HostResult<()> {
            Ok(())
        }
    }

    struct RecordingTransport(Mutex<Vec<HostMessage>>);
    impl Transport for RecordingTransport {
        fn send(&self, message: HostMessage) -> HostResult<()> {
            self.0.lock().push(message);
            Ok(())
        }
    }

    fn channel(timeout_ms: u64) -> IsolationChannel {
        IsolationChannel::with_timeout(
            "wf",
            Arc::new(NullTransport),
            Arc::new(LogRingBuffer::default()),
            Duration::from_millis(timeout_ms),
        )
    }

    // -- Envelope shapes --

    #[test]
    fn host_messages_serialize_with_type_tags() {
        let msg = HostMessage::Command { command_id: "wf.sync".into(), args: vec![json!(1)] };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "command");
        assert_eq!(v["commandId"], "wf.sync");

        let msg = HostMessage::Activate { plugin_name: "wf".into(), config: json!({}) };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "activate");
        assert_eq!(v["pluginName"], "wf");
    }

    #[test]
    fn extension_messages_parse_from_wire_json() {
        let msg: ExtensionMessage = serde_json::from_str(
            r#"{ "type": "request", "requestId": "abc", "method": "settings.get", "params": {"key": "interval"} }"#,
        )
        .unwrap();
        match msg {
            ExtensionMessage::Request { request_id, method, .. } => {
                assert_eq!(request_id, "abc");
                assert_eq!(method, "settings.get");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let msg: ExtensionMessage =
            serde_json::from_str(r#"{ "type": "log", "level": "warn", "message": "careful" }"#)
                .unwrap();
        assert!(matches!(msg, ExtensionMessage::Log { level: LogLevel::Warn, .. }));
    }

    #[test]
    fn response_omits_absent_fields() {
        let msg = HostMessage::Response {
            request_id: "abc".into(),
            result: Some(json!(1)),
            error: None,
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(!text.contains("error"));
    }

    // -- Pending table --

    #[tokio::test]
    async fn response_resolves_pending_request() {
        let pending = PendingRequests::new(Duration::from_secs(5));
        let (id, rx) = pending.register();
        assert!(pending.resolve(&id, Ok(json!("done"))));
        let value = pending.wait(&id, rx).await.unwrap();
        assert_eq!(value, json!("done"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unanswered_request_times_out_exactly_once() {
        let pending = PendingRequests::new(Duration::from_millis(30));
        let (id, rx) = pending.register();
        let err = pending.wait(&id, rx).await.unwrap_err();
        assert!(matches!(err, HostError::Timeout(_)));
        assert!(pending.is_empty());

        // Late response after the timeout is a no-op
        assert!(!pending.resolve(&id, Ok(json!("late"))));
    }

    #[tokio::test]
    async fn error_responses_reject_the_waiter() {
        let pending = PendingRequests::new(Duration::from_secs(5));
        let (id, rx) = pending.register();
        pending.resolve(&id, Err("backend exploded".into()));
        let err = pending.wait(&id, rx).await.unwrap_err();
        assert!(err.to_string().contains("backend exploded"));
    }

    #[tokio::test]
    async fn duplicate_response_is_a_noop() {
        let pending = PendingRequests::new(Duration::from_secs(5));
        let (id, rx) = pending.register();
        assert!(pending.resolve(&id, Ok(json!(1))));
        assert!(!pending.resolve(&id, Ok(json!(2))));
        assert_eq!(pending.wait(&id, rx).await.unwrap(), json!(1));
    }

    // -- Channel --

    #[tokio::test]
    async fn incoming_request_is_dispatched_and_answered() {
        let transport = Arc::new(RecordingTransport(Mutex::new(Vec::new())));
        let chan = IsolationChannel::new(
            "wf",
            transport.clone(),
            Arc::new(LogRingBuffer::default()),
        );

        struct Echo;
        #[async_trait]
        impl RequestHandler for Echo {
            async fn handle(&self, _p: &str, method: &str, params: Value) -> anyhow::Result<Value> {
                Ok(json!({ "method": method, "params": params }))
            }
        }
        chan.set_request_handler(Arc::new(Echo));

        chan.handle_incoming(ExtensionMessage::Request {
            request_id: "r1".into(),
            method: "settings.get".into(),
            params: json!({ "key": "interval" }),
        })
        .await;

        let sent = transport.0.lock().clone();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            HostMessage::Response { request_id, result, error } => {
                assert_eq!(request_id, "r1");
                assert!(error.is_none());
                assert_eq!(result.as_ref().unwrap()["method"], "settings.get");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_without_handler_answers_with_error() {
        let transport = Arc::new(RecordingTransport(Mutex::new(Vec::new())));
        let chan = IsolationChannel::new(
            "wf",
            transport.clone(),
            Arc::new(LogRingBuffer::default()),
        );

        chan.handle_incoming(ExtensionMessage::Request {
            request_id: "r1".into(),
            method: "nope".into(),
            params: Value::Null,
        })
        .await;

        let sent = transport.0.lock().clone();
        match &sent[0] {
            HostMessage::Response { error, .. } => {
                assert!(error.as_ref().unwrap().contains("nope"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn log_messages_land_in_the_ring_buffer() {
        let log = Arc::new(LogRingBuffer::default());
        let chan = IsolationChannel::new("wf", Arc::new(NullTransport), log.clone());

        chan.handle_incoming(ExtensionMessage::Log {
            level: LogLevel::Error,
            message: "sync failed".into(),
            args: vec![],
        })
        .await;

        let entries = log.entries(0);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "wf");
        assert_eq!(entries[0].message, "sync failed");
    }

    #[tokio::test]
    async fn lifecycle_ack_timeout_is_reported() {
        let chan = channel(30);
        let err = chan
            .lifecycle_roundtrip(HostMessage::Deactivate {}, "deactivate")
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Timeout(_)));
    }

    #[tokio::test]
    async fn lifecycle_ack_resolves_roundtrip() {
        let chan = Arc::new(channel(1000));
        let c = Arc::clone(&chan);
        let ack = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c.handle_incoming(ExtensionMessage::Activated {}).await;
        });

        chan.lifecycle_roundtrip(
            HostMessage::Activate { plugin_name: "wf".into(), config: json!({}) },
            "activate",
        )
        .await
        .unwrap();
        ack.await.unwrap();
    }

    #[tokio::test]
    async fn error_fails_the_inflight_lifecycle_roundtrip() {
        let chan = Arc::new(channel(1000));
        let c = Arc::clone(&chan);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c.handle_incoming(ExtensionMessage::Error { error: "init crashed".into() }).await;
        });

        let err = chan
            .lifecycle_roundtrip(
                HostMessage::Activate { plugin_name: "wf".into(), config: json!({}) },
                "activate",
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("init crashed"));
    }

    // -- Extension bridge --

    struct RecordingExtTransport(Mutex<Vec<ExtensionMessage>>);
    impl ExtensionTransport for RecordingExtTransport {
        fn send(&self, message: ExtensionMessage) -> HostResult<()> {
            self.0.lock().push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn bridge_request_resolves_on_matching_response() {
        let transport = Arc::new(RecordingExtTransport(Mutex::new(Vec::new())));
        let bridge = Arc::new(ExtensionBridge::with_timeout(
            transport.clone(),
            Duration::from_secs(5),
        ));

        let b = Arc::clone(&bridge);
        let t = transport.clone();
        let responder = tokio::spawn(async move {
            // Wait until the request envelope is visible, then answer it
            loop {
                let id = t.0.lock().iter().find_map(|m| match m {
                    ExtensionMessage::Request { request_id, .. } => Some(request_id.clone()),
                    _ => None,
                });
                if let Some(id) = id {
                    b.handle_host_message(HostMessage::Response {
                        request_id: id,
                        result: Some(json!(42)),
                        error: None,
                    });
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let value = bridge.request("settings.get", json!({ "key": "n" })).await.unwrap();
        assert_eq!(value, json!(42));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn bridge_request_times_out_without_response() {
        let bridge = ExtensionBridge::with_timeout(
            Arc::new(RecordingExtTransport(Mutex::new(Vec::new()))),
            Duration::from_millis(30),
        );
        let err = bridge.request("ping", Value::Null).await.unwrap_err();
        assert!(matches!(err, HostError::Timeout(_)));
    }

    #[tokio::test]
    async fn channel_module_deactivate_waits_for_the_ack() {
        let chan = Arc::new(channel(1000));
        let module = ChannelModule::new(Arc::clone(&chan));

        let c = Arc::clone(&chan);
        let ack = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c.handle_incoming(ExtensionMessage::Deactivated {}).await;
        });

        module.deactivate().await.unwrap();
        ack.await.unwrap();
    }

    #[test]
    fn bridge_passes_non_response_messages_through() {
        let bridge = ExtensionBridge::new(Arc::new(RecordingExtTransport(Mutex::new(Vec::new()))));
        let passed = bridge.handle_host_message(HostMessage::Event {
            event_type: "file.saved".into(),
            payload: json!({}),
        });
        assert!(passed.is_some());
    }
}
