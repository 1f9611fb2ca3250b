//! Multiplexed CDP client: one WebSocket carrying browser-level commands and
//! many attached target sessions.
//!
//! The client owns the transport, the wire codec, the session registry, and
//! the single background reader task. Commands are submitted from any task
//! and awaited on a per-command completion slot; the reader task is the only
//! consumer of the socket and the only writer into the codec's response path.
//!
//! Session recovery is an explicit two-step, never a loop: try the normal
//! send; on a lost session run one recovery pass through an internal send
//! path that bypasses the active-session check, then retry once. After that
//! the `SessionLost` error is terminal.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use periscope_types::CdpError;

use crate::codec::{self, CdpEvent, WireCodec, WireMessage, SESSION_NOT_FOUND_CODE};
use crate::registry::{SessionRegistry, TargetKind};
use crate::transport::{self, Transport, WsReader};

/// Domains enabled on every page-typed session. `Overlay` is enabled lazily
/// on first highlight, `Input` and `Target` need no enable call.
const PAGE_DOMAINS: &[&str] = &[
    "Page",
    "DOM",
    "DOMSnapshot",
    "Accessibility",
    "Runtime",
    "Network",
];

/// Default per-command round-trip budget.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the event fan-out channel.
const EVENT_CHANNEL_CAPACITY: usize = 512;

pub(crate) struct ClientInner {
    pub(crate) transport: Transport,
    pub(crate) codec: WireCodec,
    registry: std::sync::Mutex<SessionRegistry>,
    events: broadcast::Sender<CdpEvent>,
    reader: AsyncMutex<Option<JoinHandle<()>>>,
    command_timeout: Duration,
}

/// Handle to one browser connection. Cheap to clone.
#[derive(Clone)]
pub struct CdpClient {
    inner: Arc<ClientInner>,
}

impl CdpClient {
    /// Connect to a browser-level DevTools WebSocket endpoint, start the
    /// reader task, enable target discovery and auto-attach (flattened), and
    /// attach to the existing page target.
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        Self::connect_with_timeout(ws_url, DEFAULT_COMMAND_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        ws_url: &str,
        command_timeout: Duration,
    ) -> Result<Self, CdpError> {
        let (transport, reader) = Transport::connect(ws_url).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Arc::new(ClientInner {
            transport,
            codec: WireCodec::new(),
            registry: std::sync::Mutex::new(SessionRegistry::new()),
            events,
            reader: AsyncMutex::new(None),
            command_timeout,
        });

        let client = Self { inner };
        let handle = tokio::spawn(read_loop(client.clone(), reader));
        *client.inner.reader.lock().await = Some(handle);

        if let Err(e) = client.bootstrap().await {
            client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    /// Enable discovery + flattened auto-attach and attach the first page
    /// target, so iframes and OOPIFs attach automatically from here on.
    async fn bootstrap(&self) -> Result<(), CdpError> {
        self.raw_send(None, "Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;
        self.raw_send(
            None,
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "flatten": true,
                "waitForDebuggerOnStart": false,
            }),
        )
        .await?;

        let targets = self.raw_send(None, "Target.getTargets", json!({})).await?;
        let infos = targets
            .get("targetInfos")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut page_target = None;
        {
            let mut registry = self.registry();
            for info in &infos {
                let target_id = info["targetId"].as_str().unwrap_or_default();
                if target_id.is_empty() {
                    continue;
                }
                let kind = TargetKind::from_cdp(info["type"].as_str().unwrap_or(""));
                registry.add_target(
                    target_id,
                    kind,
                    info["url"].as_str().unwrap_or(""),
                    info["title"].as_str().unwrap_or(""),
                );
                if kind == TargetKind::Page && page_target.is_none() {
                    page_target = Some(target_id.to_string());
                }
            }
        }

        let target_id =
            page_target.ok_or_else(|| CdpError::not_found("no page target to attach"))?;

        let resp = self
            .raw_send(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = resp["sessionId"]
            .as_str()
            .ok_or_else(|| CdpError::not_found("sessionId in attachToTarget response"))?
            .to_string();

        self.registry().attach_session(&session_id, &target_id);
        self.enable_page_domains(&session_id).await?;

        tracing::info!(target = %target_id, session = %session_id, "attached to page target");
        Ok(())
    }

    // -- Command dispatch ---------------------------------------------------

    /// Send a browser-level command (no session).
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.raw_send(None, method, params).await
    }

    /// Send a session-scoped command with the default timeout.
    pub async fn send_to_session(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError> {
        self.send_to_session_with_timeout(session_id, method, params, self.inner.command_timeout)
            .await
    }

    /// Send a session-scoped command.
    ///
    /// If the registry marks the session inactive, or CDP reports the
    /// session gone, one recovery pass runs (re-read targets, reattach to
    /// the same target) and the command is retried once. Any failure after
    /// that single recovery pass is terminal `SessionLost` -- no further
    /// retries.
    pub async fn send_to_session_with_timeout(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let pre_recovered = !self.registry().session_is_active(session_id);
        let session = if pre_recovered {
            self.recover_session(session_id).await?
        } else {
            session_id.to_string()
        };

        match self
            .raw_send_with_timeout(Some(&session), method, params.clone(), timeout)
            .await
        {
            Ok(value) => Ok(value),
            Err(e) if pre_recovered => {
                // The recovery pass already ran before this attempt.
                tracing::warn!(session = %session, error = %e, "command failed after recovery");
                Err(CdpError::SessionLost {
                    session_id: session.clone(),
                })
            }
            Err(e) if is_session_gone(&e) => {
                let fresh = self.recover_session(&session).await?;
                // TryOnce: a failure after the recovery pass is terminal.
                match self
                    .raw_send_with_timeout(Some(&fresh), method, params, timeout)
                    .await
                {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        tracing::warn!(session = %fresh, error = %e, "retry failed after recovery");
                        Err(CdpError::SessionLost {
                            session_id: fresh.clone(),
                        })
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Internal send path: no active-session check, no recovery. Used by
    /// dispatch itself and by the recovery pass.
    async fn raw_send(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError> {
        self.raw_send_with_timeout(session_id, method, params, self.inner.command_timeout)
            .await
    }

    async fn raw_send_with_timeout(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let id = self.inner.codec.next_id();
        let rx = self.inner.codec.register(id, method, session_id).await;
        let frame = codec::encode_command(id, method, &params, session_id);

        tracing::debug!(id, method, session = ?session_id, "sending CDP command");

        if let Err(e) = self.inner.transport.send_text(frame).await {
            self.inner.codec.cancel(id).await;
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CdpError::connection("response channel closed")),
            Err(_) => {
                // Remove the pending entry so a late reply is discarded.
                self.inner.codec.cancel(id).await;
                Err(codec::timeout_error(method, timeout))
            }
        }
    }

    // -- Session recovery ---------------------------------------------------

    /// One bounded recovery pass: refresh the target table, and either adopt
    /// the fresh session auto-attach already created for the same target or
    /// reattach explicitly. Everything here uses the internal send path.
    async fn recover_session(&self, stale: &str) -> Result<String, CdpError> {
        let lost = || CdpError::SessionLost {
            session_id: stale.to_string(),
        };

        let target_id = self.registry().target_for_session(stale).ok_or_else(lost)?;
        tracing::warn!(session = stale, target = %target_id, "attempting session recovery");

        let targets = self
            .raw_send(None, "Target.getTargets", json!({}))
            .await
            .map_err(|_| lost())?;

        let mut target_alive = false;
        if let Some(infos) = targets.get("targetInfos").and_then(Value::as_array) {
            let mut registry = self.registry();
            for info in infos {
                let tid = info["targetId"].as_str().unwrap_or_default();
                if tid.is_empty() {
                    continue;
                }
                registry.add_target(
                    tid,
                    TargetKind::from_cdp(info["type"].as_str().unwrap_or("")),
                    info["url"].as_str().unwrap_or(""),
                    info["title"].as_str().unwrap_or(""),
                );
                if tid == target_id {
                    target_alive = true;
                }
            }
        }
        if !target_alive {
            return Err(lost());
        }

        // Auto-attach may have already replaced the session.
        if let Some(fresh) = self.registry().session_for_target(&target_id) {
            if fresh != stale {
                tracing::info!(session = %fresh, "recovered via auto-attached session");
                return Ok(fresh);
            }
        }

        let resp = self
            .raw_send(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await
            .map_err(|_| lost())?;
        let fresh = resp["sessionId"].as_str().ok_or_else(lost)?.to_string();

        self.registry().attach_session(&fresh, &target_id);
        if let Err(e) = self.enable_page_domains(&fresh).await {
            tracing::warn!(session = %fresh, error = %e, "domain enable failed after recovery");
        }

        tracing::info!(session = %fresh, "recovered via explicit reattach");
        Ok(fresh)
    }

    // -- Domain management --------------------------------------------------

    /// Enable the standard page domains on a session, skipping any already
    /// marked enabled.
    pub(crate) async fn enable_page_domains(&self, session_id: &str) -> Result<(), CdpError> {
        for domain in PAGE_DOMAINS {
            if self.registry().is_domain_enabled(session_id, domain) {
                continue;
            }
            self.raw_send(Some(session_id), &format!("{domain}.enable"), json!({}))
                .await?;
            self.registry().mark_domain_enabled(session_id, domain);
        }
        Ok(())
    }

    /// Lazily enable the Overlay domain (first highlight request).
    pub(crate) async fn ensure_overlay_enabled(&self, session_id: &str) -> Result<(), CdpError> {
        if self.registry().is_domain_enabled(session_id, "Overlay") {
            return Ok(());
        }
        self.raw_send(Some(session_id), "Overlay.enable", json!({}))
            .await?;
        self.registry().mark_domain_enabled(session_id, "Overlay");
        Ok(())
    }

    // -- Registry access ----------------------------------------------------

    pub(crate) fn registry(&self) -> std::sync::MutexGuard<'_, SessionRegistry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Active session of the root page target.
    pub fn root_page_session(&self) -> Option<String> {
        self.registry().root_page_session()
    }

    /// Active page and OOPIF sessions, root page first.
    pub fn page_sessions(&self) -> Vec<(String, TargetKind)> {
        self.registry().page_sessions()
    }

    /// Session owning the given frame.
    pub fn session_for_frame(&self, frame_id: &str) -> Option<String> {
        self.registry().session_for_frame(frame_id)
    }

    /// Session serving the given security origin.
    pub fn session_for_origin(&self, origin: &str) -> Option<String> {
        self.registry().session_for_origin(origin)
    }

    // -- Events -------------------------------------------------------------

    /// Subscribe to the CDP event stream. Events for a given session arrive
    /// in transport order; there is no cross-session ordering guarantee.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.inner.events.subscribe()
    }

    // -- Shutdown -----------------------------------------------------------

    /// Close the client: cancel and await the reader task (no dangling
    /// background work), close the socket, and fail every outstanding
    /// command.
    pub async fn close(&self) {
        let handle = self.inner.reader.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "reader task ended abnormally");
                }
            }
        }
        self.inner.transport.close().await;
        self.inner.codec.fail_all("client closed").await;
        tracing::info!("CDP client closed");
    }
}

/// True when an error means the session channel itself is gone.
fn is_session_gone(error: &CdpError) -> bool {
    matches!(
        error,
        CdpError::SessionLost { .. }
            | CdpError::Protocol {
                code: SESSION_NOT_FOUND_CODE,
                ..
            }
    )
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

/// The single task that owns reads from the WebSocket. Responses resolve
/// pending commands through the codec; events update the registry and fan
/// out to subscribers.
async fn read_loop(client: CdpClient, mut reader: WsReader) {
    while let Some(text) = transport::next_text_frame(&mut reader).await {
        let Some(message) = codec::decode_message(&text) else {
            tracing::warn!("undecodable CDP frame, skipping");
            continue;
        };

        match message {
            WireMessage::Response(resp) => client.inner.codec.complete(resp).await,
            WireMessage::Event(event) => {
                route_event(&client, &event).await;
                // Subscribers may come and go; a send error just means
                // nobody is listening right now.
                let _ = client.inner.events.send(event);
            }
        }
    }

    client.inner.codec.fail_all("websocket closed").await;
    tracing::info!("CDP reader task finished");
}

/// Apply lifecycle events to the registry. Registry locks are never held
/// across an await.
async fn route_event(client: &CdpClient, event: &CdpEvent) {
    match event.method.as_str() {
        "Target.targetCreated" | "Target.targetInfoChanged" => {
            let info = &event.params["targetInfo"];
            if let Some(target_id) = info["targetId"].as_str() {
                client.registry().add_target(
                    target_id,
                    TargetKind::from_cdp(info["type"].as_str().unwrap_or("")),
                    info["url"].as_str().unwrap_or(""),
                    info["title"].as_str().unwrap_or(""),
                );
            }
        }
        "Target.targetDestroyed" => {
            if let Some(target_id) = event.params["targetId"].as_str() {
                // A destroy may arrive without a preceding detach; commands
                // in flight for the session must still resolve.
                let session = client.registry().session_for_target(target_id);
                client.registry().remove_target(target_id);
                if let Some(session_id) = session {
                    client.inner.codec.fail_session(&session_id).await;
                }
            }
        }
        "Target.attachedToTarget" => {
            let session_id = event.params["sessionId"].as_str().unwrap_or_default();
            let info = &event.params["targetInfo"];
            let target_id = info["targetId"].as_str().unwrap_or_default();
            if session_id.is_empty() || target_id.is_empty() {
                return;
            }
            let kind = TargetKind::from_cdp(info["type"].as_str().unwrap_or(""));
            {
                let mut registry = client.registry();
                registry.add_target(
                    target_id,
                    kind,
                    info["url"].as_str().unwrap_or(""),
                    info["title"].as_str().unwrap_or(""),
                );
                registry.attach_session(session_id, target_id);
            }
            tracing::debug!(session = session_id, target = target_id, ?kind, "session attached");

            // Domain enabling sends commands whose responses only arrive if
            // the reader keeps reading, so it must run on its own task.
            if matches!(kind, TargetKind::Page | TargetKind::Iframe) {
                let client = client.clone();
                let session = session_id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = client.enable_page_domains(&session).await {
                        tracing::warn!(session = %session, error = %e, "domain enable failed");
                    }
                });
            }
        }
        "Target.detachedFromTarget" => {
            if let Some(session_id) = event.params["sessionId"].as_str() {
                client.registry().detach_session(session_id);
                // No command outlives its session.
                client.inner.codec.fail_session(session_id).await;
                tracing::debug!(session = session_id, "session detached");
            }
        }
        "Page.frameAttached" => {
            let frame_id = event.params["frameId"].as_str().unwrap_or_default();
            let parent = event.params["parentFrameId"].as_str();
            if let (false, Some(session)) = (frame_id.is_empty(), event.session_id.as_deref()) {
                let target = client.registry().target_for_session(session);
                if let Some(target_id) = target {
                    client
                        .registry()
                        .upsert_frame(frame_id, &target_id, parent, "");
                }
            }
        }
        "Page.frameNavigated" => {
            let frame = &event.params["frame"];
            let frame_id = frame["id"].as_str().unwrap_or_default();
            if let (false, Some(session)) = (frame_id.is_empty(), event.session_id.as_deref()) {
                let target = client.registry().target_for_session(session);
                if let Some(target_id) = target {
                    client.registry().upsert_frame(
                        frame_id,
                        &target_id,
                        frame["parentId"].as_str(),
                        frame["url"].as_str().unwrap_or(""),
                    );
                }
            }
        }
        "Page.frameDetached" => {
            if let Some(frame_id) = event.params["frameId"].as_str() {
                client.registry().remove_frame(frame_id);
            }
        }
        _ => {}
    }
}
