//! High-level browser facade: page-state observation and index-addressed
//! actions.
//!
//! `get_state` runs the observation cycle (collect -> merge -> serialize,
//! with URL, title, and screenshot fetched concurrently) and returns an
//! immutable [`BrowserState`]. Actions resolve a 1-based element index
//! through the selector map of the most recent state, pre-check the
//! element's observed geometry, and route the CDP primitives to the session
//! that owns the element's frame.
//!
//! Action failures are returned in the structured [`ActionResult`], never
//! raised, so an agent loop reacts uniformly without catching errors.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use periscope_cdp::{collect_raw_snapshot, CdpClient, ScrollDirection, SelectBy};
use periscope_dom::{merge, serialize_dom, MergeOptions, SerializeOptions};
use periscope_types::{
    ActionResult, BrowserConfig, BrowserState, CdpError, EnhancedNode, ErrorKind, SelectorMap,
    Viewport,
};

use crate::launcher::{self, LaunchedBrowser};

/// Poll attempts (500 ms apart) for the debug endpoint after launch.
const ENDPOINT_ATTEMPTS: u32 = 20;

/// High-level browser automation interface.
///
/// Connects to an already-running browser when one is listening on the
/// configured debug port, otherwise launches its own instance and owns its
/// lifetime.
pub struct Browser {
    config: BrowserConfig,
    client: Option<CdpClient>,
    chrome: Option<LaunchedBrowser>,
    selector_map: SelectorMap,
    /// Merged nodes of the last observation, aligned with the selector map
    /// (index i maps to nodes[i - 1]).
    nodes: Vec<EnhancedNode>,
    last_state: Option<BrowserState>,
}

impl Browser {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            client: None,
            chrome: None,
            selector_map: SelectorMap::new(),
            nodes: Vec::new(),
            last_state: None,
        }
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Connect to an existing browser or launch one.
    ///
    /// A subprocess launched here is scoped: any failure before the CDP
    /// connection is healthy kills and reaps it before the error
    /// propagates.
    pub async fn start(&mut self) -> Result<(), CdpError> {
        let host = self.config.host.clone();
        let port = self.config.port;

        let ws_url = match launcher::fetch_ws_url(&host, port).await {
            Ok(url) => {
                tracing::info!(host = %host, port, "connected to existing browser");
                url
            }
            Err(_) => {
                let binary = launcher::discover_chrome(None)
                    .map_err(|e| CdpError::connection(e.to_string()))?;
                let mut child = LaunchedBrowser::spawn(&self.config, &binary)
                    .map_err(|e| CdpError::connection(e.to_string()))?;
                match launcher::wait_for_endpoint(&host, port, &mut child, ENDPOINT_ATTEMPTS)
                    .await
                {
                    Ok(url) => {
                        self.chrome = Some(child);
                        url
                    }
                    Err(e) => {
                        child.kill().await;
                        return Err(CdpError::connection(e.to_string()));
                    }
                }
            }
        };

        let command_timeout = Duration::from_secs_f64(self.config.action_timeout.max(1.0));
        match CdpClient::connect_with_timeout(&ws_url, command_timeout).await {
            Ok(client) => {
                self.client = Some(client);
                tracing::info!("browser session started");
                Ok(())
            }
            Err(e) => {
                if let Some(mut child) = self.chrome.take() {
                    child.kill().await;
                }
                Err(e)
            }
        }
    }

    /// Close the CDP client (cancelling its reader task) and terminate a
    /// launched browser subprocess.
    pub async fn stop(&mut self) {
        if let Some(client) = self.client.take() {
            client.close().await;
        }
        if let Some(mut child) = self.chrome.take() {
            child.kill().await;
        }
        tracing::info!("browser session stopped");
    }

    fn client(&self) -> Result<&CdpClient, CdpError> {
        self.client
            .as_ref()
            .ok_or_else(|| CdpError::connection("browser not started"))
    }

    fn root_session(&self) -> Result<String, CdpError> {
        self.client()?
            .root_page_session()
            .ok_or_else(|| CdpError::not_found("root page session"))
    }

    // -- Observation --------------------------------------------------------

    /// Observe the current page state.
    ///
    /// Collects the raw snapshots for the root page session and every
    /// attached OOPIF session, merges and serializes them, and fetches URL,
    /// title, and (optionally) a screenshot concurrently. Indices in the
    /// returned state are valid until the next observation.
    pub async fn get_state(&mut self, include_screenshot: bool) -> Result<BrowserState, CdpError> {
        let client = self.client()?.clone();
        let sessions = client.page_sessions();
        if sessions.is_empty() {
            return Err(CdpError::not_found("no page session to observe"));
        }

        let fetch_timeout = Duration::from_secs_f64(self.config.dom_fetch_timeout.max(1.0));
        let merge_opts = MergeOptions {
            min_confidence: self.config.min_confidence,
        };

        let mut all_nodes: Vec<EnhancedNode> = Vec::new();
        let mut node_sessions: Vec<String> = Vec::new();
        let mut viewport = Viewport {
            width: self.config.viewport_width as f64,
            height: self.config.viewport_height as f64,
        };
        let mut missing_sources = Vec::new();

        for (i, (session_id, kind)) in sessions.iter().enumerate() {
            let raw = match collect_raw_snapshot(&client, session_id, fetch_timeout).await {
                Ok(raw) => raw,
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!(session = %session_id, ?kind, error = %e, "skipping subframe snapshot");
                    continue;
                }
            };
            if i == 0 {
                viewport = raw.viewport;
                missing_sources = raw.missing_sources.clone();
            }
            for node in merge(&raw, &merge_opts) {
                all_nodes.push(node);
                node_sessions.push(session_id.clone());
            }
        }

        let serialized = serialize_dom(&all_nodes, &SerializeOptions::default());
        let mut selector_map = serialized.selector_map;
        for (index, entry) in selector_map.iter_mut() {
            entry.session_id = node_sessions.get(index - 1).cloned();
        }

        let root = sessions[0].0.clone();
        let (url, title, screenshot) = tokio::join!(
            client.get_current_url(&root),
            client.get_page_title(&root),
            async {
                if include_screenshot {
                    Some(
                        client
                            .capture_screenshot(
                                &root,
                                self.config.screenshot_format,
                                self.config.screenshot_quality,
                                false,
                            )
                            .await,
                    )
                } else {
                    None
                }
            }
        );

        let url = url.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "url fetch failed");
            String::new()
        });
        let title = title.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "title fetch failed");
            String::new()
        });
        let screenshot = match screenshot {
            Some(Ok(bytes)) => Some(bytes),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "screenshot failed");
                None
            }
            None => None,
        };

        let state = BrowserState {
            url,
            title,
            dom_text: serialized.text,
            selector_map: selector_map.clone(),
            screenshot,
            viewport,
            missing_sources,
        };

        self.selector_map = selector_map;
        self.nodes = all_nodes;
        self.last_state = Some(state.clone());
        Ok(state)
    }

    /// Number of actionable elements in the last observation.
    pub fn element_count(&self) -> usize {
        self.selector_map.len()
    }

    /// Metadata for an element of the last observation.
    pub fn get_element(&self, index: usize) -> Option<&periscope_types::SelectorEntry> {
        self.selector_map.get(&index)
    }

    /// The most recently observed state.
    pub fn last_state(&self) -> Option<&BrowserState> {
        self.last_state.as_ref()
    }

    // -- Index resolution ---------------------------------------------------

    /// Resolve an index to (session, backend node id), running the
    /// pre-action geometry checks from the last observation.
    fn resolve(&self, action: &str, index: usize) -> Result<(String, i64), ActionResult> {
        let fail = |kind: ErrorKind, msg: String| {
            Err(ActionResult::failed(action, kind, msg).with_index(index))
        };

        let Some(entry) = self.selector_map.get(&index) else {
            return fail(
                ErrorKind::NotFound,
                format!("element [{index}] not found; observe the page state first"),
            );
        };

        if let Some(node) = self.nodes.get(index - 1) {
            if node.is_occluded {
                return fail(
                    ErrorKind::Occluded,
                    format!("element [{index}] is covered by another element"),
                );
            }
            if !node.is_visible {
                return fail(
                    ErrorKind::NotVisible,
                    format!("element [{index}] is not visible"),
                );
            }
        }

        let session = entry
            .session_id
            .clone()
            .or_else(|| self.client.as_ref().and_then(|c| c.root_page_session()));
        match session {
            Some(session) => Ok((session, entry.backend_node_id)),
            None => fail(
                ErrorKind::SessionLost,
                format!("no session for element [{index}]"),
            ),
        }
    }

    // -- Actions ------------------------------------------------------------

    /// Click an element by index.
    pub async fn click(&self, index: usize) -> ActionResult {
        let (session, backend_id) = match self.resolve("click", index) {
            Ok(ok) => ok,
            Err(result) => return result,
        };
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => return action_error("click", &e).with_index(index),
        };

        match client.click_node(&session, backend_id).await {
            Ok(()) => ActionResult::ok("click").with_index(index),
            Err(e) => action_error("click", &e).with_index(index),
        }
    }

    /// Type text into an element by index.
    pub async fn type_text(&self, index: usize, text: &str, clear_existing: bool) -> ActionResult {
        let (session, backend_id) = match self.resolve("type", index) {
            Ok(ok) => ok,
            Err(result) => return result,
        };
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => return action_error("type", &e).with_index(index),
        };

        match client
            .type_text(&session, backend_id, text, clear_existing)
            .await
        {
            Ok(()) => ActionResult::ok("type").with_index(index),
            Err(e) => action_error("type", &e).with_index(index),
        }
    }

    /// Select an option in a dropdown by index. `by` is one of "value",
    /// "text", "index".
    pub async fn select(&self, index: usize, value: &str, by: &str) -> ActionResult {
        let by = match by.parse::<SelectBy>() {
            Ok(by) => by,
            Err(e) => return action_error("select", &e).with_index(index),
        };
        let (session, backend_id) = match self.resolve("select", index) {
            Ok(ok) => ok,
            Err(result) => return result,
        };
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => return action_error("select", &e).with_index(index),
        };

        match client.select_option(&session, backend_id, value, by).await {
            Ok(()) => ActionResult::ok("select")
                .with_index(index)
                .with_content(value),
            Err(e) => action_error("select", &e).with_index(index),
        }
    }

    /// Scroll the page. `direction` is one of "up", "down", "left", "right".
    pub async fn scroll(&self, direction: &str, amount: f64) -> ActionResult {
        let direction = match direction.parse::<ScrollDirection>() {
            Ok(d) => d,
            Err(e) => return action_error("scroll", &e),
        };
        let (client, session) = match self.client_and_root() {
            Ok(ok) => ok,
            Err(e) => return action_error("scroll", &e),
        };

        match client.scroll(&session, direction, amount, None).await {
            Ok(()) => ActionResult::ok("scroll").with_content(format!("{direction:?} {amount}px")),
            Err(e) => action_error("scroll", &e),
        }
    }

    /// Press a keyboard key with optional modifiers.
    pub async fn press_key(&self, key: &str, modifiers: &[String]) -> ActionResult {
        let (client, session) = match self.client_and_root() {
            Ok(ok) => ok,
            Err(e) => return action_error("press_key", &e),
        };

        match client.press_key(&session, key, modifiers).await {
            Ok(()) => {
                let suffix = if modifiers.is_empty() {
                    String::new()
                } else {
                    format!("+{}", modifiers.join("+"))
                };
                ActionResult::ok("press_key").with_content(format!("{key}{suffix}"))
            }
            Err(e) => action_error("press_key", &e),
        }
    }

    /// Navigate to a URL and wait for the page to settle.
    pub async fn navigate(&self, url: &str) -> ActionResult {
        let (client, session) = match self.client_and_root() {
            Ok(ok) => ok,
            Err(e) => return action_error("navigate", &e),
        };

        let timeout = Duration::from_secs_f64(self.config.page_load_timeout.max(1.0));
        let idle = Duration::from_secs_f64(self.config.network_idle_timeout.max(0.1));
        match client.navigate(&session, url, true, timeout, idle).await {
            Ok(()) => ActionResult::ok("navigate").with_content(url),
            Err(e) => action_error("navigate", &e),
        }
    }

    /// Navigate back in history.
    pub async fn go_back(&self) -> ActionResult {
        self.history_step("go_back").await
    }

    /// Navigate forward in history.
    pub async fn go_forward(&self) -> ActionResult {
        self.history_step("go_forward").await
    }

    async fn history_step(&self, action: &str) -> ActionResult {
        let (client, session) = match self.client_and_root() {
            Ok(ok) => ok,
            Err(e) => return action_error(action, &e),
        };

        let moved = if action == "go_back" {
            client.go_back(&session).await
        } else {
            client.go_forward(&session).await
        };

        match moved {
            Ok(true) => ActionResult::ok(action),
            Ok(false) => ActionResult::failed(
                action,
                ErrorKind::NotFound,
                "no history entry in that direction",
            ),
            Err(e) => action_error(action, &e),
        }
    }

    /// Reload the current page.
    pub async fn refresh(&self) -> ActionResult {
        let (client, session) = match self.client_and_root() {
            Ok(ok) => ok,
            Err(e) => return action_error("refresh", &e),
        };
        match client.refresh(&session).await {
            Ok(()) => ActionResult::ok("refresh"),
            Err(e) => action_error("refresh", &e),
        }
    }

    /// Capture a screenshot to a temp file, returning its path in the
    /// result. Bytes never travel through the action surface.
    pub async fn screenshot(&self, full_page: bool) -> ActionResult {
        let (client, session) = match self.client_and_root() {
            Ok(ok) => ok,
            Err(e) => return action_error("screenshot", &e),
        };

        let bytes = match client
            .capture_screenshot(
                &session,
                self.config.screenshot_format,
                self.config.screenshot_quality,
                full_page,
            )
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => return action_error("screenshot", &e),
        };

        match persist_screenshot(&bytes, self.config.screenshot_format) {
            Ok(path) => ActionResult::ok("screenshot")
                .with_content(format!("{} bytes", bytes.len()))
                .with_screenshot_ref(path),
            Err(e) => ActionResult::failed(
                "screenshot",
                ErrorKind::Connection,
                format!("failed to persist screenshot: {e}"),
            ),
        }
    }

    /// Briefly highlight an element by index (debugging aid).
    pub async fn highlight(&self, index: usize, duration: Duration) -> ActionResult {
        let (session, backend_id) = match self.resolve("highlight", index) {
            Ok(ok) => ok,
            Err(result) => return result,
        };
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => return action_error("highlight", &e).with_index(index),
        };

        match client.highlight_node(&session, backend_id, duration).await {
            Ok(()) => ActionResult::ok("highlight").with_index(index),
            Err(e) => action_error("highlight", &e).with_index(index),
        }
    }

    fn client_and_root(&self) -> Result<(&CdpClient, String), CdpError> {
        let client = self.client()?;
        let session = self.root_session()?;
        Ok((client, session))
    }
}

fn action_error(action: &str, error: &CdpError) -> ActionResult {
    ActionResult::failed(action, error.kind(), error.to_string())
}

/// Write screenshot bytes to a kept temp file and return its path.
fn persist_screenshot(
    bytes: &[u8],
    format: periscope_types::ScreenshotFormat,
) -> std::io::Result<PathBuf> {
    let suffix = match format {
        periscope_types::ScreenshotFormat::Jpeg => ".jpg",
        periscope_types::ScreenshotFormat::Png => ".png",
    };
    let file = tempfile::Builder::new()
        .prefix("periscope-shot-")
        .suffix(suffix)
        .tempfile()?;
    let (mut handle, path) = file.keep().map_err(|e| e.error)?;
    handle.write_all(bytes)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
