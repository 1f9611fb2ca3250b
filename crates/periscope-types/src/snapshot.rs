//! Raw page snapshot: the three CDP data sources captured at one instant.

use serde_json::Value;

use crate::model::Viewport;

/// Computed styles requested from `DOMSnapshot.captureSnapshot`.
///
/// The snapshot's `layout.styles` rows are value arrays parallel to this
/// list, so the request side and the merge side must agree on it exactly.
pub const COMPUTED_STYLE_PROPS: &[&str] = &[
    "display",
    "visibility",
    "opacity",
    "cursor",
    "pointer-events",
    "user-select",
    "overflow",
    "position",
];

/// The tuple of raw CDP payloads the merger consumes.
///
/// Each source is independently optional: a failed fetch leaves `None` and
/// records the source name in `missing_sources`, and downstream analysis
/// degrades gracefully.
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    /// `DOM.getDocument(depth=-1, pierce=true)` result.
    pub dom: Option<Value>,
    /// `DOMSnapshot.captureSnapshot` result.
    pub snapshot: Option<Value>,
    /// `Accessibility.getFullAXTree` result.
    pub ax: Option<Value>,
    /// CSS-pixel viewport at capture time.
    pub viewport: Viewport,
    /// Multiplier between CSS pixels and device pixels.
    pub device_pixel_ratio: f64,
    /// Names of sources that failed ("dom", "snapshot", "ax", "metrics").
    pub missing_sources: Vec<String>,
}

impl RawSnapshot {
    /// True when at least one source failed.
    pub fn is_partial(&self) -> bool {
        !self.missing_sources.is_empty()
    }
}
