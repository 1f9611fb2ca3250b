//! CDP wire codec: frame encoding, inbound classification, and the
//! pending-command table.
//!
//! Outbound frames are `{id, method, params, [sessionId]}` with ids drawn
//! from a per-connection monotonic counter. Inbound frames are either a
//! command response (`id` + `result`/`error`) or an event (`method` +
//! `params`, optionally `sessionId`).
//!
//! The codec owns request/response correlation. A response whose id is
//! unknown (cancelled command, late reply after timeout) is logged and
//! discarded -- it is never delivered to a requester.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use periscope_types::CdpError;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A CDP event received from the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// The event method name (e.g. "Page.loadEventFired").
    pub method: String,
    /// The event parameters.
    pub params: Value,
    /// Session the event belongs to; `None` for browser-level events.
    pub session_id: Option<String>,
}

/// A command response from the browser.
#[derive(Debug, Clone)]
pub struct CdpResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<CdpResponseError>,
}

/// Error object in a CDP response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

/// One parsed inbound frame.
#[derive(Debug, Clone)]
pub enum WireMessage {
    Response(CdpResponse),
    Event(CdpEvent),
}

/// CDP error code reported for commands addressed to a vanished session.
pub const SESSION_NOT_FOUND_CODE: i64 = -32001;

// ---------------------------------------------------------------------------
// Frame building / parsing
// ---------------------------------------------------------------------------

/// Build one outbound command frame as a JSON string.
pub fn encode_command(id: u64, method: &str, params: &Value, session_id: Option<&str>) -> String {
    let mut frame = serde_json::json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(sid) = session_id {
        frame["sessionId"] = Value::String(sid.to_string());
    }
    frame.to_string()
}

/// Classify one inbound frame. Returns `None` for unparseable or
/// unclassifiable frames (logged by the caller).
pub fn decode_message(text: &str) -> Option<WireMessage> {
    let json: Value = serde_json::from_str(text).ok()?;

    // A frame with an `id` is a response.
    if let Some(id) = json.get("id").and_then(|v| v.as_u64()) {
        return Some(WireMessage::Response(CdpResponse {
            id,
            result: json.get("result").cloned(),
            error: json
                .get("error")
                .and_then(|e| serde_json::from_value(e.clone()).ok()),
        }));
    }

    // A frame with a `method` (and no `id`) is an event.
    let method = json.get("method")?.as_str()?.to_string();
    Some(WireMessage::Event(CdpEvent {
        method,
        params: json.get("params").cloned().unwrap_or(Value::Null),
        session_id: json
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }))
}

// ---------------------------------------------------------------------------
// Pending-command table
// ---------------------------------------------------------------------------

struct PendingCommand {
    method: String,
    session_id: Option<String>,
    tx: oneshot::Sender<Result<Value, CdpError>>,
}

/// Owns command-id generation and request/response correlation for one
/// connection.
pub struct WireCodec {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCommand>>,
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Draw the next command id from the monotonic counter.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a command before it is written to the wire, so the response
    /// cannot race the registration.
    pub async fn register(
        &self,
        id: u64,
        method: &str,
        session_id: Option<&str>,
    ) -> oneshot::Receiver<Result<Value, CdpError>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        pending.insert(
            id,
            PendingCommand {
                method: method.to_string(),
                session_id: session_id.map(str::to_string),
                tx,
            },
        );
        rx
    }

    /// Remove a pending entry (timeout path). A reply arriving later finds
    /// no entry and is discarded.
    pub async fn cancel(&self, id: u64) {
        self.pending.lock().await.remove(&id);
    }

    /// Resolve the pending command matching this response.
    pub async fn complete(&self, response: CdpResponse) {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending.remove(&response.id)
        };

        let Some(entry) = entry else {
            tracing::debug!(id = response.id, "response for unknown command id, discarding");
            return;
        };

        let outcome = match response.error {
            Some(err) => Err(CdpError::Protocol {
                method: entry.method,
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = entry.tx.send(outcome);
    }

    /// Fail every pending command addressed to the given session with
    /// `SessionLost`. Called when the session detaches, so no command
    /// outlives its session.
    pub async fn fail_session(&self, session_id: &str) {
        let mut pending = self.pending.lock().await;
        let doomed: Vec<u64> = pending
            .iter()
            .filter(|(_, cmd)| cmd.session_id.as_deref() == Some(session_id))
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            if let Some(cmd) = pending.remove(&id) {
                let _ = cmd.tx.send(Err(CdpError::SessionLost {
                    session_id: session_id.to_string(),
                }));
            }
        }
    }

    /// Fail every outstanding command atomically (connection closed).
    pub async fn fail_all(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        for (_, cmd) in pending.drain() {
            let _ = cmd.tx.send(Err(CdpError::connection(reason)));
        }
    }

    /// Number of in-flight commands.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper for timeout wrapping: how long a method was allowed to run.
pub fn timeout_error(method: &str, duration: Duration) -> CdpError {
    CdpError::Timeout {
        method: method.to_string(),
        duration,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Frame building -----------------------------------------------------

    #[test]
    fn test_encode_command_browser_level() {
        let text = encode_command(
            42,
            "Page.navigate",
            &serde_json::json!({"url": "https://example.com"}),
            None,
        );
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["method"], "Page.navigate");
        assert_eq!(json["params"]["url"], "https://example.com");
        assert!(json.get("sessionId").is_none());
    }

    #[test]
    fn test_encode_command_session_scoped() {
        let text = encode_command(7, "DOM.getDocument", &serde_json::json!({}), Some("SESSION1"));
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["sessionId"], "SESSION1");
    }

    // -- Frame parsing ------------------------------------------------------

    #[test]
    fn test_decode_response_success() {
        let msg = decode_message(r#"{"id": 1, "result": {"frameId": "abc123"}}"#).unwrap();
        match msg {
            WireMessage::Response(resp) => {
                assert_eq!(resp.id, 1);
                assert_eq!(resp.result.unwrap()["frameId"], "abc123");
                assert!(resp.error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_response_error() {
        let msg = decode_message(
            r#"{"id": 2, "error": {"code": -32602, "message": "Invalid params"}}"#,
        )
        .unwrap();
        match msg {
            WireMessage::Response(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, -32602);
                assert_eq!(err.message, "Invalid params");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_event_with_session() {
        let msg = decode_message(
            r#"{"method": "Page.loadEventFired", "params": {"timestamp": 1.5}, "sessionId": "S9"}"#,
        )
        .unwrap();
        match msg {
            WireMessage::Event(evt) => {
                assert_eq!(evt.method, "Page.loadEventFired");
                assert_eq!(evt.params["timestamp"], 1.5);
                assert_eq!(evt.session_id.as_deref(), Some("S9"));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_event_without_params() {
        let msg = decode_message(r#"{"method": "Page.domContentEventFired"}"#).unwrap();
        match msg {
            WireMessage::Event(evt) => {
                assert_eq!(evt.method, "Page.domContentEventFired");
                assert_eq!(evt.params, Value::Null);
                assert!(evt.session_id.is_none());
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_message("not json").is_none());
        assert!(decode_message(r#"{"params": {"foo": 1}}"#).is_none());
    }

    // -- Pending table ------------------------------------------------------

    #[tokio::test]
    async fn test_register_and_complete() {
        let codec = WireCodec::new();
        let id = codec.next_id();
        let rx = codec.register(id, "Browser.getVersion", None).await;

        codec
            .complete(CdpResponse {
                id,
                result: Some(serde_json::json!({"product": "Chrome/120"})),
                error: None,
            })
            .await;

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["product"], "Chrome/120");
        assert_eq!(codec.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_complete_with_protocol_error() {
        let codec = WireCodec::new();
        let id = codec.next_id();
        let rx = codec.register(id, "Page.navigate", None).await;

        codec
            .complete(CdpResponse {
                id,
                result: None,
                error: Some(CdpResponseError {
                    code: -32000,
                    message: "Cannot navigate".into(),
                    data: None,
                }),
            })
            .await;

        match rx.await.unwrap() {
            Err(CdpError::Protocol {
                method,
                code,
                message,
            }) => {
                assert_eq!(method, "Page.navigate");
                assert_eq!(code, -32000);
                assert_eq!(message, "Cannot navigate");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_command_discards_late_reply() {
        let codec = WireCodec::new();
        let id = codec.next_id();
        let rx = codec.register(id, "DOM.getDocument", None).await;

        // Timeout path removes the entry...
        codec.cancel(id).await;
        assert_eq!(codec.pending_count().await, 0);

        // ...so the late reply finds nothing and the receiver sees a closed
        // channel rather than a stale value.
        codec
            .complete(CdpResponse {
                id,
                result: Some(Value::Null),
                error: None,
            })
            .await;
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_fail_session_only_hits_that_session() {
        let codec = WireCodec::new();
        let id_a = codec.next_id();
        let id_b = codec.next_id();
        let rx_a = codec.register(id_a, "DOM.getDocument", Some("S1")).await;
        let rx_b = codec.register(id_b, "DOM.getDocument", Some("S2")).await;

        codec.fail_session("S1").await;

        match rx_a.await.unwrap() {
            Err(CdpError::SessionLost { session_id }) => assert_eq!(session_id, "S1"),
            other => panic!("expected session lost, got {other:?}"),
        }
        // S2's command is untouched.
        assert_eq!(codec.pending_count().await, 1);
        drop(rx_b);
    }

    #[tokio::test]
    async fn test_fail_all_on_close() {
        let codec = WireCodec::new();
        let rx1 = codec.register(codec.next_id(), "A.b", None).await;
        let rx2 = codec.register(codec.next_id(), "C.d", Some("S1")).await;

        codec.fail_all("websocket closed").await;

        for rx in [rx1, rx2] {
            match rx.await.unwrap() {
                Err(CdpError::Connection { reason }) => {
                    assert!(reason.contains("websocket closed"))
                }
                other => panic!("expected connection error, got {other:?}"),
            }
        }
        assert_eq!(codec.pending_count().await, 0);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let codec = WireCodec::new();
        let a = codec.next_id();
        let b = codec.next_id();
        let c = codec.next_id();
        assert!(a < b && b < c);
    }
}
