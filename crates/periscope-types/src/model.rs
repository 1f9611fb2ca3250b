//! Core data model: merged element nodes, selector map entries, browser
//! state snapshots, and structured action results.
//!
//! Geometry is always in CSS pixels. Device-pixel values from the snapshot
//! layer are divided by the device pixel ratio before they reach any type in
//! this module.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
        }
    }
}

/// A point in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// An axis-aligned rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        (self.width * self.height).max(0.0)
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// Area of the overlap between two rectangles; 0.0 when disjoint.
    pub fn intersection_area(&self, other: &Rect) -> f64 {
        let ix = self.x.max(other.x);
        let iy = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);
        if ix < ix2 && iy < iy2 {
            (ix2 - ix) * (iy2 - iy)
        } else {
            0.0
        }
    }

    /// True when no part of the rectangle lies inside the viewport.
    pub fn outside_viewport(&self, viewport: &Viewport) -> bool {
        self.x > viewport.width
            || self.y > viewport.height
            || self.x + self.width < 0.0
            || self.y + self.height < 0.0
    }
}

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// How an element is meant to be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    Input,
    Select,
    Toggle,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Click => "click",
            ActionType::Input => "input",
            ActionType::Select => "select",
            ActionType::Toggle => "toggle",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EnhancedNode
// ---------------------------------------------------------------------------

/// Merger output unit: one candidate interactive element with geometry,
/// semantics, and a confidence score.
///
/// `backend_node_id` is the browser-assigned identifier, stable across the
/// DOM, DOMSnapshot, and accessibility sources for the lifetime of the
/// document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedNode {
    pub backend_node_id: i64,
    pub tag_name: String,
    pub attributes: HashMap<String, String>,
    pub text_content: String,
    /// Bounds in CSS pixels (device bounds already divided by DPR).
    pub bounds_css: Rect,
    /// Recommended hit point in CSS pixels: the center of the
    /// viewport-visible part of the bounds.
    pub click_point: Point,
    pub ax_role: Option<String>,
    pub ax_name: String,
    pub ax_focusable: bool,
    pub ax_disabled: bool,
    pub is_visible: bool,
    pub is_interactive: bool,
    pub is_clickable: bool,
    pub is_occluded: bool,
    pub paint_order: i64,
    /// Frame this node belongs to; `None` for the main frame.
    pub frame_id: Option<String>,
    pub action_type: ActionType,
    /// Confidence in [0, 1] that this element is actionable.
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Selector map
// ---------------------------------------------------------------------------

/// What the selector map stores per LLM-facing index.
///
/// Indices are 1-based and valid only within the `BrowserState` they were
/// built for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorEntry {
    pub backend_node_id: i64,
    /// Session that owns this node's frame. Filled in by the facade, which
    /// holds the frame-to-session routing table.
    pub session_id: Option<String>,
    pub frame_id: Option<String>,
    pub bounds_css: Rect,
    pub click_point: Point,
    pub action_type: ActionType,
    pub tag: String,
    /// Short human-readable label (accessible name or trimmed text).
    pub label: String,
}

/// Index-addressed element table, 1-based.
pub type SelectorMap = BTreeMap<usize, SelectorEntry>;

// ---------------------------------------------------------------------------
// BrowserState
// ---------------------------------------------------------------------------

/// Immutable snapshot of the page handed to the agent layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserState {
    pub url: String,
    pub title: String,
    /// Serialized element inventory, one line per actionable element.
    pub dom_text: String,
    pub selector_map: SelectorMap,
    /// Raw screenshot bytes (jpeg/png per config); at most one kept in
    /// memory at a time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
    pub viewport: Viewport,
    /// Sources that failed during collection, if any (e.g. "ax").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_sources: Vec<String>,
}

impl BrowserState {
    pub fn element_count(&self) -> usize {
        self.selector_map.len()
    }

    pub fn get_element(&self, index: usize) -> Option<&SelectorEntry> {
        self.selector_map.get(&index)
    }

    /// Format the state for inclusion in an LLM prompt.
    pub fn to_prompt(&self) -> String {
        let mut lines = vec![
            format!("URL: {}", self.url),
            format!("Title: {}", self.title),
            format!(
                "Viewport: {}x{}",
                self.viewport.width as i64, self.viewport.height as i64
            ),
            format!("Elements: {}", self.element_count()),
            String::new(),
            "=== Actionable Elements ===".to_string(),
            self.dom_text.clone(),
        ];
        if self.screenshot.is_some() {
            lines.insert(4, "Screenshot: [attached]".to_string());
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// ActionResult
// ---------------------------------------------------------------------------

/// Structured outcome of a browser action.
///
/// Failures travel through this type, never as raised errors, so the agent
/// loop can react uniformly. Screenshots are referenced by temp-file path,
/// never embedded, to keep long-lived histories small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<PathBuf>,
}

impl ActionResult {
    pub fn ok(action: impl Into<String>) -> Self {
        Self {
            success: true,
            action: action.into(),
            element_index: None,
            error_kind: None,
            error_message: None,
            extracted_content: None,
            screenshot_ref: None,
        }
    }

    pub fn failed(
        action: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            action: action.into(),
            element_index: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            extracted_content: None,
            screenshot_ref: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.element_index = Some(index);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.extracted_content = Some(content.into());
        self
    }

    pub fn with_screenshot_ref(mut self, path: PathBuf) -> Self {
        self.screenshot_ref = Some(path);
        self
    }

    /// Format the result as a one-line message for the LLM.
    pub fn to_message(&self) -> String {
        let mut msg = if self.success {
            format!("ok: {}", self.action)
        } else {
            format!("failed: {}", self.action)
        };
        if let Some(index) = self.element_index {
            msg.push_str(&format!(" on element [{index}]"));
        }
        if let Some(ref content) = self.extracted_content {
            msg.push_str(&format!(": {content}"));
        }
        if let Some(ref err) = self.error_message {
            msg.push_str(&format!(": {err}"));
        }
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Rect tests ---------------------------------------------------------

    #[test]
    fn rect_center_and_area() {
        let r = Rect::new(100.0, 200.0, 80.0, 30.0);
        let c = r.center();
        assert!((c.x - 140.0).abs() < f64::EPSILON);
        assert!((c.y - 215.0).abs() < f64::EPSILON);
        assert!((r.area() - 2400.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rect_intersection_area_overlapping() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        let b = Rect::new(50.0, 50.0, 100.0, 100.0);
        assert!((a.intersection_area(&b) - 2500.0).abs() < f64::EPSILON);
        // Symmetric.
        assert!((b.intersection_area(&a) - 2500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rect_intersection_area_disjoint() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.intersection_area(&b), 0.0);
    }

    #[test]
    fn rect_intersection_area_contained() {
        let outer = Rect::new(0.0, 0.0, 100.0, 100.0);
        let inner = Rect::new(25.0, 25.0, 10.0, 10.0);
        assert!((outer.intersection_area(&inner) - inner.area()).abs() < f64::EPSILON);
    }

    #[test]
    fn rect_outside_viewport() {
        let vp = Viewport {
            width: 1280.0,
            height: 720.0,
        };
        assert!(Rect::new(1300.0, 10.0, 50.0, 50.0).outside_viewport(&vp));
        assert!(Rect::new(-100.0, -100.0, 50.0, 50.0).outside_viewport(&vp));
        assert!(!Rect::new(100.0, 100.0, 50.0, 50.0).outside_viewport(&vp));
        // Partially on-screen counts as inside.
        assert!(!Rect::new(-25.0, 10.0, 50.0, 50.0).outside_viewport(&vp));
    }

    // -- ActionType ---------------------------------------------------------

    #[test]
    fn action_type_display() {
        assert_eq!(ActionType::Click.to_string(), "click");
        assert_eq!(ActionType::Input.to_string(), "input");
        assert_eq!(ActionType::Select.to_string(), "select");
        assert_eq!(ActionType::Toggle.to_string(), "toggle");
    }

    // -- ActionResult -------------------------------------------------------

    #[test]
    fn action_result_ok_message() {
        let r = ActionResult::ok("click").with_index(3);
        assert!(r.success);
        assert_eq!(r.to_message(), "ok: click on element [3]");
    }

    #[test]
    fn action_result_error_message() {
        let r = ActionResult::failed("select", ErrorKind::InputRejected, "no such option")
            .with_index(2);
        assert!(!r.success);
        assert_eq!(r.error_kind, Some(ErrorKind::InputRejected));
        assert_eq!(
            r.to_message(),
            "failed: select on element [2]: no such option"
        );
    }

    #[test]
    fn action_result_content_message() {
        let r = ActionResult::ok("navigate").with_content("https://example.com");
        assert_eq!(r.to_message(), "ok: navigate: https://example.com");
    }

    // -- BrowserState -------------------------------------------------------

    fn sample_state() -> BrowserState {
        let mut map = SelectorMap::new();
        map.insert(
            1,
            SelectorEntry {
                backend_node_id: 42,
                session_id: Some("S1".into()),
                frame_id: None,
                bounds_css: Rect::new(100.0, 200.0, 80.0, 30.0),
                click_point: Point { x: 140.0, y: 215.0 },
                action_type: ActionType::Click,
                tag: "button".into(),
                label: "Go".into(),
            },
        );
        BrowserState {
            url: "https://example.com".into(),
            title: "Example".into(),
            dom_text: "[1]<button> name=\"Go\" action=click".into(),
            selector_map: map,
            screenshot: None,
            viewport: Viewport::default(),
            missing_sources: Vec::new(),
        }
    }

    #[test]
    fn browser_state_element_lookup() {
        let state = sample_state();
        assert_eq!(state.element_count(), 1);
        let entry = state.get_element(1).unwrap();
        assert_eq!(entry.backend_node_id, 42);
        assert_eq!(entry.tag, "button");
        assert!(state.get_element(2).is_none());
    }

    #[test]
    fn browser_state_prompt_contains_inventory() {
        let state = sample_state();
        let prompt = state.to_prompt();
        assert!(prompt.contains("URL: https://example.com"));
        assert!(prompt.contains("Elements: 1"));
        assert!(prompt.contains("[1]<button>"));
        assert!(!prompt.contains("Screenshot"));
    }
}
