//! Per-session action primitives: click, type, key, select, scroll,
//! screenshot, navigation, and highlight.
//!
//! Geometry is never trusted from a prior observation: `click_node` scrolls
//! the element into view and re-reads the box model before dispatching the
//! mouse events, because the stored click point may be stale after scroll.

use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::{json, Value};

use periscope_types::{CdpError, Point, ScreenshotFormat};

use crate::client::CdpClient;
use crate::keys::{lookup_key, modifier_bitmask, KeyDefinition};

// ---------------------------------------------------------------------------
// Parameter types
// ---------------------------------------------------------------------------

/// Scroll direction for `Input.dispatchMouseEvent` wheel events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl FromStr for ScrollDirection {
    type Err = CdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(CdpError::input_rejected(format!(
                "unknown scroll direction '{other}'"
            ))),
        }
    }
}

/// How `select_option` matches an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectBy {
    Value,
    Text,
    Index,
}

impl SelectBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectBy::Value => "value",
            SelectBy::Text => "text",
            SelectBy::Index => "index",
        }
    }
}

impl FromStr for SelectBy {
    type Err = CdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "value" => Ok(SelectBy::Value),
            "text" => Ok(SelectBy::Text),
            "index" => Ok(SelectBy::Index),
            other => Err(CdpError::input_rejected(format!(
                "unknown select mode '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Center of an 8-value content quad `[x1,y1, x2,y2, x3,y3, x4,y4]`.
pub fn quad_center(quad: &[f64]) -> Option<Point> {
    if quad.len() < 8 {
        return None;
    }
    let xs: Vec<f64> = quad.iter().step_by(2).copied().collect();
    let ys: Vec<f64> = quad.iter().skip(1).step_by(2).copied().collect();
    let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some(Point {
        x: (min_x + max_x) / 2.0,
        y: (min_y + max_y) / 2.0,
    })
}

/// `Input.dispatchMouseEvent` parameters for a left-button press/release.
fn mouse_click_params(event_type: &str, point: Point) -> Value {
    json!({
        "type": event_type,
        "x": point.x,
        "y": point.y,
        "button": "left",
        "clickCount": 1,
    })
}

/// `Input.dispatchKeyEvent` parameters for one key transition.
fn key_event_params(def: &KeyDefinition, modifiers: i64, down: bool) -> Value {
    let event_type = if down {
        if def.text.is_some() {
            "keyDown"
        } else {
            "rawKeyDown"
        }
    } else {
        "keyUp"
    };
    let mut params = json!({
        "type": event_type,
        "modifiers": modifiers,
        "key": def.key,
        "code": def.code,
        "windowsVirtualKeyCode": def.windows_virtual_key_code,
    });
    if down {
        if let Some(text) = &def.text {
            params["text"] = json!(text);
            params["unmodifiedText"] = json!(text);
        }
    }
    params
}

/// Matches an option by value/text/index, selects it, and fires the
/// synthetic `input` and `change` events frameworks listen for.
const SELECT_OPTION_FN: &str = r#"
function(value, by) {
    if (!this.options) {
        return { ok: false, error: 'not a <select> element' };
    }
    const options = Array.from(this.options);
    let idx = -1;
    if (by === 'index') {
        const n = parseInt(value, 10);
        if (!isNaN(n) && n >= 0 && n < options.length) { idx = n; }
    } else if (by === 'text') {
        idx = options.findIndex(o => o.textContent.trim() === value);
    } else {
        idx = options.findIndex(o => o.value === value);
    }
    if (idx < 0) {
        return { ok: false, error: 'no option matching "' + value + '" by ' + by };
    }
    this.selectedIndex = idx;
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return { ok: true };
}
"#;

/// Clears the current value of an input-like element before typing.
const CLEAR_VALUE_FN: &str = r#"
function() {
    if ('value' in this) {
        this.value = '';
    } else if (this.isContentEditable) {
        this.textContent = '';
    }
    this.dispatchEvent(new Event('input', { bubbles: true }));
}
"#;

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

impl CdpClient {
    /// Click an element: scroll it into view, re-read its geometry, and
    /// dispatch mousePressed + mouseReleased at the refreshed center.
    pub async fn click_node(
        &self,
        session_id: &str,
        backend_node_id: i64,
    ) -> Result<(), CdpError> {
        self.send_to_session(
            session_id,
            "DOM.scrollIntoViewIfNeeded",
            json!({ "backendNodeId": backend_node_id }),
        )
        .await?;

        let point = self.node_center(session_id, backend_node_id).await?;

        self.send_to_session(
            session_id,
            "Input.dispatchMouseEvent",
            mouse_click_params("mousePressed", point),
        )
        .await?;
        self.send_to_session(
            session_id,
            "Input.dispatchMouseEvent",
            mouse_click_params("mouseReleased", point),
        )
        .await?;
        Ok(())
    }

    /// Current box-model center of a node, in CSS pixels.
    pub async fn node_center(
        &self,
        session_id: &str,
        backend_node_id: i64,
    ) -> Result<Point, CdpError> {
        let result = self
            .send_to_session(
                session_id,
                "DOM.getBoxModel",
                json!({ "backendNodeId": backend_node_id }),
            )
            .await?;

        let quad: Vec<f64> = result["model"]["content"]
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        quad_center(&quad)
            .ok_or_else(|| CdpError::not_found(format!("box model for node {backend_node_id}")))
    }

    /// Focus an element and type text into it. Printable characters go
    /// through `Input.insertText`; newline and tab become key events.
    pub async fn type_text(
        &self,
        session_id: &str,
        backend_node_id: i64,
        text: &str,
        clear_existing: bool,
    ) -> Result<(), CdpError> {
        self.send_to_session(
            session_id,
            "DOM.focus",
            json!({ "backendNodeId": backend_node_id }),
        )
        .await?;

        if clear_existing {
            self.call_function_on_node(session_id, backend_node_id, CLEAR_VALUE_FN, vec![])
                .await?;
        }

        for ch in text.chars() {
            match ch {
                '\n' => self.press_key(session_id, "Enter", &[]).await?,
                '\t' => self.press_key(session_id, "Tab", &[]).await?,
                ch if ch.is_control() => {
                    tracing::debug!(codepoint = ch as u32, "skipping control character");
                }
                ch => {
                    self.send_to_session(
                        session_id,
                        "Input.insertText",
                        json!({ "text": ch.to_string() }),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Press a key (mnemonic name or single character) with optional
    /// modifiers.
    pub async fn press_key(
        &self,
        session_id: &str,
        key: &str,
        modifiers: &[String],
    ) -> Result<(), CdpError> {
        let def = lookup_key(key)?;
        let mask = modifier_bitmask(modifiers)?;

        self.send_to_session(
            session_id,
            "Input.dispatchKeyEvent",
            key_event_params(&def, mask, true),
        )
        .await?;
        self.send_to_session(
            session_id,
            "Input.dispatchKeyEvent",
            key_event_params(&def, mask, false),
        )
        .await?;
        Ok(())
    }

    /// Select an option in a `<select>` element and fire `input`/`change`.
    pub async fn select_option(
        &self,
        session_id: &str,
        backend_node_id: i64,
        value: &str,
        by: SelectBy,
    ) -> Result<(), CdpError> {
        let outcome = self
            .call_function_on_node(
                session_id,
                backend_node_id,
                SELECT_OPTION_FN,
                vec![json!({ "value": value }), json!({ "value": by.as_str() })],
            )
            .await?;

        if outcome["ok"].as_bool() != Some(true) {
            let reason = outcome["error"]
                .as_str()
                .unwrap_or("option selection failed")
                .to_string();
            return Err(CdpError::input_rejected(reason));
        }
        Ok(())
    }

    /// Scroll via a wheel event. The dispatch point defaults to the viewport
    /// center, queried from the browser at call time.
    pub async fn scroll(
        &self,
        session_id: &str,
        direction: ScrollDirection,
        amount: f64,
        at: Option<Point>,
    ) -> Result<(), CdpError> {
        let point = match at {
            Some(p) => p,
            None => self.viewport_center(session_id).await?,
        };

        let (delta_x, delta_y) = match direction {
            ScrollDirection::Down => (0.0, amount),
            ScrollDirection::Up => (0.0, -amount),
            ScrollDirection::Right => (amount, 0.0),
            ScrollDirection::Left => (-amount, 0.0),
        };

        self.send_to_session(
            session_id,
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseWheel",
                "x": point.x,
                "y": point.y,
                "deltaX": delta_x,
                "deltaY": delta_y,
            }),
        )
        .await?;
        Ok(())
    }

    /// Viewport center in CSS pixels, from `Page.getLayoutMetrics`.
    async fn viewport_center(&self, session_id: &str) -> Result<Point, CdpError> {
        let metrics = self
            .send_to_session(session_id, "Page.getLayoutMetrics", json!({}))
            .await?;
        let vp = &metrics["cssVisualViewport"];
        let width = vp["clientWidth"].as_f64().unwrap_or(1280.0);
        let height = vp["clientHeight"].as_f64().unwrap_or(720.0);
        Ok(Point {
            x: width / 2.0,
            y: height / 2.0,
        })
    }

    /// Capture a screenshot, returning raw image bytes.
    pub async fn capture_screenshot(
        &self,
        session_id: &str,
        format: ScreenshotFormat,
        quality: u8,
        full_page: bool,
    ) -> Result<Vec<u8>, CdpError> {
        let mut params = json!({ "format": format.as_str() });
        if format == ScreenshotFormat::Jpeg {
            params["quality"] = json!(quality.min(100));
        }

        if full_page {
            let metrics = self
                .send_to_session(session_id, "Page.getLayoutMetrics", json!({}))
                .await?;
            let content = &metrics["cssContentSize"];
            if let (Some(width), Some(height)) =
                (content["width"].as_f64(), content["height"].as_f64())
            {
                params["captureBeyondViewport"] = json!(true);
                params["clip"] = json!({
                    "x": 0, "y": 0,
                    "width": width, "height": height,
                    "scale": 1,
                });
            }
        }

        let result = self
            .send_to_session_with_timeout(
                session_id,
                "Page.captureScreenshot",
                params,
                Duration::from_secs(30),
            )
            .await?;

        let data = result["data"].as_str().ok_or_else(|| CdpError::Protocol {
            method: "Page.captureScreenshot".into(),
            code: 0,
            message: "response missing 'data' field".into(),
        })?;

        B64.decode(data).map_err(|e| CdpError::Protocol {
            method: "Page.captureScreenshot".into(),
            code: 0,
            message: format!("invalid base64 payload: {e}"),
        })
    }

    /// Navigate and optionally wait for the page to settle.
    pub async fn navigate(
        &self,
        session_id: &str,
        url: &str,
        wait: bool,
        timeout: Duration,
        idle_window: Duration,
    ) -> Result<(), CdpError> {
        // Subscribe before the command goes out so a fast load event cannot
        // be missed.
        let events = self.subscribe();

        let result = self
            .send_to_session(session_id, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = result["errorText"].as_str() {
            return Err(CdpError::Protocol {
                method: "Page.navigate".into(),
                code: 0,
                message: error_text.to_string(),
            });
        }

        if wait {
            self.wait_for_load_on(events, session_id, timeout, idle_window)
                .await?;
        }
        Ok(())
    }

    /// Wait for document readiness: `Page.loadEventFired`, then a short
    /// network-idle window, then a `document.readyState` final guard.
    pub async fn wait_for_load(
        &self,
        session_id: &str,
        timeout: Duration,
        idle_window: Duration,
    ) -> Result<(), CdpError> {
        let events = self.subscribe();
        self.wait_for_load_on(events, session_id, timeout, idle_window)
            .await
    }

    async fn wait_for_load_on(
        &self,
        mut events: tokio::sync::broadcast::Receiver<crate::codec::CdpEvent>,
        session_id: &str,
        timeout: Duration,
        idle_window: Duration,
    ) -> Result<(), CdpError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let timed_out = || codec_timeout(timeout);

        // Primary signal: the load event for this session.
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(event)) => {
                    if event.method == "Page.loadEventFired"
                        && event.session_id.as_deref() == Some(session_id)
                    {
                        break;
                    }
                }
                // Lagged subscribers just keep draining.
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                    return Err(CdpError::connection("event stream closed during load wait"));
                }
                Err(_) => return Err(timed_out()),
            }
        }

        // Short network-idle window: restart whenever a new request starts.
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let window = idle_window.min(remaining);
            match tokio::time::timeout(window, events.recv()).await {
                Ok(Ok(event)) => {
                    if event.method == "Network.requestWillBeSent"
                        && event.session_id.as_deref() == Some(session_id)
                    {
                        continue;
                    }
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
                _ => break,
            }
        }

        // Final guard only: the load event already fired.
        loop {
            let ready = self
                .evaluate(session_id, "document.readyState === 'complete'")
                .await
                .map(|v| v.as_bool().unwrap_or(false))
                .unwrap_or(false);
            if ready {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(timed_out());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Evaluate a JavaScript expression, returning the value.
    pub async fn evaluate(&self, session_id: &str, expression: &str) -> Result<Value, CdpError> {
        let result = self
            .send_to_session(
                session_id,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("unknown exception")
                .to_string();
            return Err(CdpError::Protocol {
                method: "Runtime.evaluate".into(),
                code: 0,
                message,
            });
        }

        Ok(result["result"]["value"].clone())
    }

    pub async fn get_current_url(&self, session_id: &str) -> Result<String, CdpError> {
        let value = self.evaluate(session_id, "window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn get_page_title(&self, session_id: &str) -> Result<String, CdpError> {
        let value = self.evaluate(session_id, "document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Go back in history. Returns false when there is no earlier entry.
    pub async fn go_back(&self, session_id: &str) -> Result<bool, CdpError> {
        self.navigate_history(session_id, -1).await
    }

    /// Go forward in history. Returns false when there is no later entry.
    pub async fn go_forward(&self, session_id: &str) -> Result<bool, CdpError> {
        self.navigate_history(session_id, 1).await
    }

    async fn navigate_history(&self, session_id: &str, delta: i64) -> Result<bool, CdpError> {
        let history = self
            .send_to_session(session_id, "Page.getNavigationHistory", json!({}))
            .await?;
        let current = history["currentIndex"].as_i64().unwrap_or(0);
        let entries = history["entries"].as_array().cloned().unwrap_or_default();

        let target = current + delta;
        if target < 0 || target as usize >= entries.len() {
            return Ok(false);
        }
        let entry_id = entries[target as usize]["id"]
            .as_i64()
            .ok_or_else(|| CdpError::not_found("history entry id"))?;

        self.send_to_session(
            session_id,
            "Page.navigateToHistoryEntry",
            json!({ "entryId": entry_id }),
        )
        .await?;
        Ok(true)
    }

    /// Reload the current page.
    pub async fn refresh(&self, session_id: &str) -> Result<(), CdpError> {
        self.send_to_session(session_id, "Page.reload", json!({}))
            .await?;
        Ok(())
    }

    /// Highlight an element via the Overlay domain, hiding it again after
    /// `duration`. Overlay is enabled lazily on first use.
    pub async fn highlight_node(
        &self,
        session_id: &str,
        backend_node_id: i64,
        duration: Duration,
    ) -> Result<(), CdpError> {
        self.ensure_overlay_enabled(session_id).await?;

        self.send_to_session(
            session_id,
            "Overlay.highlightNode",
            json!({
                "backendNodeId": backend_node_id,
                "highlightConfig": {
                    "contentColor": { "r": 111, "g": 168, "b": 220, "a": 0.66 },
                    "showInfo": true,
                },
            }),
        )
        .await?;

        let client = self.clone();
        let session = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(e) = client
                .send_to_session(&session, "Overlay.hideHighlight", json!({}))
                .await
            {
                tracing::debug!(error = %e, "failed to hide highlight");
            }
        });
        Ok(())
    }

    /// Resolve a backend node to a JS object and call a function on it.
    async fn call_function_on_node(
        &self,
        session_id: &str,
        backend_node_id: i64,
        function: &str,
        arguments: Vec<Value>,
    ) -> Result<Value, CdpError> {
        let resolved = self
            .send_to_session(
                session_id,
                "DOM.resolveNode",
                json!({ "backendNodeId": backend_node_id }),
            )
            .await?;
        let object_id = resolved["object"]["objectId"]
            .as_str()
            .ok_or_else(|| CdpError::not_found(format!("JS object for node {backend_node_id}")))?
            .to_string();

        let result = self
            .send_to_session(
                session_id,
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function,
                    "arguments": arguments,
                    "returnByValue": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("unknown exception")
                .to_string();
            return Err(CdpError::Protocol {
                method: "Runtime.callFunctionOn".into(),
                code: 0,
                message,
            });
        }

        Ok(result["result"]["value"].clone())
    }
}

fn codec_timeout(duration: Duration) -> CdpError {
    CdpError::Timeout {
        method: "Page.loadEventFired".into(),
        duration,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
