//! Multi-source element merger: correlates the flattened DOM, the layout
//! snapshot, and the accessibility tree by backend node id, and produces a
//! ranked list of candidate interactive elements.
//!
//! The merger is a pure function of its input: the same [`RawSnapshot`]
//! always yields the same node list in the same order. Traversal is
//! iterative throughout -- deep DOMs must not blow the stack.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use periscope_types::{
    ActionType, EnhancedNode, Point, RawSnapshot, Rect, Viewport, COMPUTED_STYLE_PROPS,
};

// ---------------------------------------------------------------------------
// Classification tables
// ---------------------------------------------------------------------------

/// Tags that are interactive by definition.
const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "details", "summary",
];

/// ARIA / AX roles that mark an element interactive.
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "combobox",
    "checkbox",
    "radio",
    "tab",
    "menuitem",
    "option",
    "switch",
    "searchbox",
    "listbox",
];

/// Inline handler attributes that add interactivity evidence.
const EVENT_ATTRS: &[&str] = &["onclick", "onmousedown", "onmouseup", "onkeydown", "onkeyup"];

/// `<input type=...>` values that take typed text.
const INPUT_TYPES_TEXT: &[&str] = &["text", "email", "password", "search", "url", "tel"];

/// `<input type=...>` values that toggle.
const INPUT_TYPES_TOGGLE: &[&str] = &["checkbox", "radio"];

/// Obstacles covering more than this share of a candidate occlude it.
const OCCLUSION_COVERAGE: f64 = 0.9;

/// Obstacles more transparent than this never occlude.
const OCCLUSION_MIN_OPACITY: f64 = 0.1;

/// Either dimension below this (CSS px) costs a confidence penalty.
const SMALL_DIMENSION_PX: f64 = 5.0;

/// Options for a merge pass.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Elements scoring below this are dropped.
    pub min_confidence: f64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
        }
    }
}

// ---------------------------------------------------------------------------
// Merge entry point
// ---------------------------------------------------------------------------

/// Merge the raw snapshot sources into a ranked list of interactive
/// elements.
///
/// Any subset of sources is accepted: a missing AX tree degrades role and
/// name signals (lowering confidence), a missing layout snapshot leaves no
/// geometry and therefore no visible candidates.
pub fn merge(raw: &RawSnapshot, opts: &MergeOptions) -> Vec<EnhancedNode> {
    let snapshot_lookup = raw
        .snapshot
        .as_ref()
        .map(|s| build_snapshot_lookup(s, raw.device_pixel_ratio))
        .unwrap_or_default();
    let ax_lookup = raw
        .ax
        .as_ref()
        .map(build_ax_lookup)
        .unwrap_or_default();

    let mut candidates = Vec::new();
    if let Some(root) = raw.dom.as_ref().and_then(|d| d.get("root")) {
        walk_dom(
            root,
            &snapshot_lookup,
            &ax_lookup,
            &raw.viewport,
            &mut candidates,
        );
    }
    tracing::debug!(
        candidates = candidates.len(),
        missing = ?raw.missing_sources,
        "merged snapshot sources"
    );

    detect_occlusion(&mut candidates);

    for candidate in &mut candidates {
        candidate.node.confidence = confidence_score(&candidate.node);
    }

    let mut result: Vec<EnhancedNode> = candidates
        .into_iter()
        .map(|c| c.node)
        .filter(|n| n.is_visible && n.is_interactive && n.confidence >= opts.min_confidence)
        .collect();

    // Total order: confidence first, then top-then-left reading order, with
    // the backend id as the final determinism tiebreak.
    result.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.bounds_css
                    .y
                    .partial_cmp(&b.bounds_css.y)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                a.bounds_css
                    .x
                    .partial_cmp(&b.bounds_css.x)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.backend_node_id.cmp(&b.backend_node_id))
    });

    result
}

// ---------------------------------------------------------------------------
// Source lookups
// ---------------------------------------------------------------------------

fn int_array(value: &Value) -> Vec<i64> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

fn float_array(value: &Value) -> Vec<f64> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
struct SnapshotInfo {
    bounds_css: Rect,
    computed: HashMap<String, String>,
    paint_order: i64,
}

/// Index the layout snapshot by backend node id.
///
/// The layout table is sparse: `layout.nodeIndex[j]` points row `j` back at
/// the node tables, and `layout.styles[j]` holds string-table indices
/// parallel to the requested computed-style list. Iterates every document
/// (main frame plus same-process iframes).
fn build_snapshot_lookup(snapshot: &Value, dpr: f64) -> HashMap<i64, SnapshotInfo> {
    let mut lookup = HashMap::new();
    let strings: Vec<&str> = snapshot["strings"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let dpr = if dpr > 0.0 { dpr } else { 1.0 };

    let Some(documents) = snapshot["documents"].as_array() else {
        return lookup;
    };

    for doc in documents {
        let backend_ids = int_array(&doc["nodes"]["backendNodeId"]);
        let layout = &doc["layout"];
        let node_indexes = int_array(&layout["nodeIndex"]);
        let empty = Vec::new();
        let bounds_rows = layout["bounds"].as_array().unwrap_or(&empty);
        let style_rows = layout["styles"].as_array().unwrap_or(&empty);
        let paint_orders = int_array(&layout["paintOrders"]);

        for (row, &node_index) in node_indexes.iter().enumerate() {
            let Some(&backend_id) = backend_ids.get(node_index as usize) else {
                continue;
            };
            if backend_id <= 0 {
                continue;
            }

            let device = bounds_rows
                .get(row)
                .map(|b| float_array(b))
                .unwrap_or_default();
            if device.len() < 4 {
                continue;
            }
            let bounds_css = Rect::new(
                device[0] / dpr,
                device[1] / dpr,
                device[2] / dpr,
                device[3] / dpr,
            );

            let mut computed = HashMap::new();
            if let Some(style_row) = style_rows.get(row) {
                let indices = int_array(style_row);
                for (pos, &string_index) in indices.iter().enumerate() {
                    let Some(prop) = COMPUTED_STYLE_PROPS.get(pos) else {
                        break;
                    };
                    if string_index >= 0 {
                        if let Some(value) = strings.get(string_index as usize) {
                            computed.insert((*prop).to_string(), (*value).to_string());
                        }
                    }
                }
            }

            lookup.insert(
                backend_id,
                SnapshotInfo {
                    bounds_css,
                    computed,
                    paint_order: paint_orders.get(row).copied().unwrap_or(0),
                },
            );
        }
    }

    lookup
}

#[derive(Debug, Clone, Default)]
struct AxInfo {
    role: String,
    name: String,
    focusable: bool,
    disabled: bool,
}

/// Index the accessibility tree by backend DOM node id.
fn build_ax_lookup(ax: &Value) -> HashMap<i64, AxInfo> {
    let mut lookup = HashMap::new();
    let Some(nodes) = ax["nodes"].as_array() else {
        return lookup;
    };

    for node in nodes {
        let Some(backend_id) = node["backendDOMNodeId"].as_i64() else {
            continue;
        };

        let mut info = AxInfo {
            role: node["role"]["value"].as_str().unwrap_or_default().to_string(),
            name: node["name"]["value"].as_str().unwrap_or_default().to_string(),
            ..Default::default()
        };

        if let Some(properties) = node["properties"].as_array() {
            for prop in properties {
                let value = prop["value"]["value"].as_bool().unwrap_or(false);
                match prop["name"].as_str() {
                    Some("focusable") => info.focusable = value,
                    Some("disabled") => info.disabled = value,
                    _ => {}
                }
            }
        }

        lookup.insert(backend_id, info);
    }

    lookup
}

// ---------------------------------------------------------------------------
// DOM traversal
// ---------------------------------------------------------------------------

/// Candidate node plus the computed styles the occlusion pass still needs.
struct Candidate {
    node: EnhancedNode,
    pointer_events_none: bool,
    opacity: f64,
}

/// Depth-first walk of the flattened DOM with an explicit stack, joining
/// each element node against the snapshot and AX indexes.
fn walk_dom(
    root: &Value,
    snapshot_lookup: &HashMap<i64, SnapshotInfo>,
    ax_lookup: &HashMap<i64, AxInfo>,
    viewport: &Viewport,
    out: &mut Vec<Candidate>,
) {
    let mut stack: Vec<(&Value, Option<String>)> = vec![(root, None)];

    while let Some((node, mut frame_id)) = stack.pop() {
        if let Some(fid) = node["frameId"].as_str() {
            frame_id = Some(fid.to_string());
        }

        if node["nodeType"].as_i64() == Some(1) {
            if let Some(backend_id) = node["backendNodeId"].as_i64() {
                if let Some(snapshot_info) = snapshot_lookup.get(&backend_id) {
                    out.push(build_candidate(
                        node,
                        backend_id,
                        snapshot_info,
                        ax_lookup.get(&backend_id),
                        viewport,
                        frame_id.clone(),
                    ));
                }
            }
        }

        // Reverse push keeps document order on the pop side.
        if let Some(children) = node["children"].as_array() {
            for child in children.iter().rev() {
                stack.push((child, frame_id.clone()));
            }
        }
        if let Some(content) = node.get("contentDocument") {
            stack.push((content, frame_id.clone()));
        }
        if let Some(shadow_roots) = node["shadowRoots"].as_array() {
            for shadow in shadow_roots.iter().rev() {
                stack.push((shadow, frame_id.clone()));
            }
        }
    }
}

fn build_candidate(
    dom_node: &Value,
    backend_id: i64,
    snapshot: &SnapshotInfo,
    ax: Option<&AxInfo>,
    viewport: &Viewport,
    frame_id: Option<String>,
) -> Candidate {
    let tag_name = dom_node["nodeName"]
        .as_str()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let attributes = parse_attributes(dom_node);
    let text_content = extract_text_content(dom_node);
    let default_ax = AxInfo::default();
    let ax = ax.unwrap_or(&default_ax);

    let bounds = snapshot.bounds_css;
    let click_point = clipped_center(&bounds, viewport);
    let styles = &snapshot.computed;

    let is_visible = is_element_visible(&bounds, styles, viewport);
    let is_interactive = is_element_interactive(&tag_name, &attributes, ax, styles);
    let is_clickable = is_element_clickable(&tag_name, &attributes, ax, styles, is_interactive);
    let action_type = classify_action(&tag_name, &attributes, ax);

    let opacity = parse_opacity(styles);
    let pointer_events_none = styles.get("pointer-events").map(String::as_str) == Some("none");

    Candidate {
        node: EnhancedNode {
            backend_node_id: backend_id,
            tag_name,
            attributes,
            text_content,
            bounds_css: bounds,
            click_point,
            ax_role: if ax.role.is_empty() {
                None
            } else {
                Some(ax.role.clone())
            },
            ax_name: ax.name.clone(),
            ax_focusable: ax.focusable,
            ax_disabled: ax.disabled,
            is_visible,
            is_interactive,
            is_clickable,
            is_occluded: false,
            paint_order: snapshot.paint_order,
            frame_id,
            action_type,
            confidence: 0.0,
        },
        pointer_events_none,
        opacity,
    }
}

/// Hit point for a node: the center of the viewport-visible part of its
/// bounds, so partially scrolled-off elements still get an on-screen click
/// point. Never returns a point outside the viewport: a rect that only
/// touches the edge yields the edge point, and the degenerate fallback
/// clamps the plain center into the viewport.
fn clipped_center(bounds: &Rect, viewport: &Viewport) -> Point {
    let x0 = bounds.x.max(0.0);
    let y0 = bounds.y.max(0.0);
    let x1 = (bounds.x + bounds.width).min(viewport.width);
    let y1 = (bounds.y + bounds.height).min(viewport.height);
    if x1 >= x0 && y1 >= y0 {
        Point {
            x: (x0 + x1) / 2.0,
            y: (y0 + y1) / 2.0,
        }
    } else {
        let center = bounds.center();
        Point {
            x: center.x.clamp(0.0, viewport.width),
            y: center.y.clamp(0.0, viewport.height),
        }
    }
}

/// Flatten the `[name, value, name, value, ...]` attribute array.
fn parse_attributes(dom_node: &Value) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    if let Some(list) = dom_node["attributes"].as_array() {
        for pair in list.chunks(2) {
            if let [name, value] = pair {
                if let (Some(name), Some(value)) = (name.as_str(), value.as_str()) {
                    attributes.insert(name.to_string(), value.to_string());
                }
            }
        }
    }
    attributes
}

/// Text-node limit when gathering an element's text.
const TEXT_NODE_BUDGET: usize = 512;
/// Collected-character cap; the serializer truncates to 80 anyway.
const TEXT_CHAR_BUDGET: usize = 160;

/// Concatenated descendant text, iteratively, with bounded work.
fn extract_text_content(dom_node: &Value) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut collected = 0usize;
    let mut visited = 0usize;
    let mut stack = vec![dom_node];

    while let Some(node) = stack.pop() {
        visited += 1;
        if visited > TEXT_NODE_BUDGET || collected >= TEXT_CHAR_BUDGET {
            break;
        }
        if node["nodeType"].as_i64() == Some(3) {
            let text = node["nodeValue"].as_str().unwrap_or_default().trim();
            if !text.is_empty() {
                collected += text.len();
                parts.push(text);
            }
        }
        if let Some(children) = node["children"].as_array() {
            for child in children.iter().rev() {
                stack.push(child);
            }
        }
    }

    parts.join(" ")
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

fn parse_opacity(styles: &HashMap<String, String>) -> f64 {
    styles
        .get("opacity")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(1.0)
}

/// Visible: non-zero area inside the viewport, not display:none,
/// not visibility:hidden, opacity above zero.
fn is_element_visible(
    bounds: &Rect,
    styles: &HashMap<String, String>,
    viewport: &Viewport,
) -> bool {
    if bounds.width <= 0.0 || bounds.height <= 0.0 {
        return false;
    }
    if bounds.outside_viewport(viewport) {
        return false;
    }
    if styles.get("display").map(String::as_str) == Some("none") {
        return false;
    }
    if styles.get("visibility").map(String::as_str) == Some("hidden") {
        return false;
    }
    parse_opacity(styles) > 0.0
}

/// Interactive: cursor:pointer is authoritative (modern frameworks attach
/// listeners without inline handlers); pointer-events:none is a veto; then
/// tag, ARIA role, AX role, AX focusability, inline handlers, and tabindex
/// all add evidence.
fn is_element_interactive(
    tag_name: &str,
    attributes: &HashMap<String, String>,
    ax: &AxInfo,
    styles: &HashMap<String, String>,
) -> bool {
    if styles.get("cursor").map(String::as_str) == Some("pointer") {
        return true;
    }
    if styles.get("pointer-events").map(String::as_str) == Some("none") {
        return false;
    }

    if INTERACTIVE_TAGS.contains(&tag_name) {
        return true;
    }
    if EVENT_ATTRS.iter().any(|attr| attributes.contains_key(*attr)) {
        return true;
    }

    let role = attributes
        .get("role")
        .map(|r| r.to_ascii_lowercase())
        .unwrap_or_default();
    if INTERACTIVE_ROLES.contains(&role.as_str()) {
        return true;
    }
    let ax_role = ax.role.to_ascii_lowercase();
    if INTERACTIVE_ROLES.contains(&ax_role.as_str()) {
        return true;
    }

    if ax.focusable && !ax.disabled {
        return true;
    }

    match attributes.get("tabindex").map(String::as_str) {
        Some("") | Some("-1") | None => false,
        Some(_) => true,
    }
}

fn is_element_clickable(
    tag_name: &str,
    attributes: &HashMap<String, String>,
    ax: &AxInfo,
    styles: &HashMap<String, String>,
    is_interactive: bool,
) -> bool {
    if !is_interactive {
        return false;
    }
    if styles.get("pointer-events").map(String::as_str) == Some("none") {
        return false;
    }
    if ax.disabled {
        return false;
    }
    match attributes.get("disabled").map(String::as_str) {
        Some("") | Some("true") | Some("disabled") => false,
        _ => true,
    }
}

fn classify_action(
    tag_name: &str,
    attributes: &HashMap<String, String>,
    ax: &AxInfo,
) -> ActionType {
    if tag_name == "input" {
        let input_type = attributes
            .get("type")
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_else(|| "text".to_string());
        if INPUT_TYPES_TEXT.contains(&input_type.as_str()) {
            return ActionType::Input;
        }
        if INPUT_TYPES_TOGGLE.contains(&input_type.as_str()) {
            return ActionType::Toggle;
        }
        return ActionType::Click;
    }
    if tag_name == "textarea" {
        return ActionType::Input;
    }
    if tag_name == "select" {
        return ActionType::Select;
    }

    match ax.role.to_ascii_lowercase().as_str() {
        "textbox" | "searchbox" => ActionType::Input,
        "combobox" | "listbox" => ActionType::Select,
        "checkbox" | "radio" | "switch" => ActionType::Toggle,
        _ => ActionType::Click,
    }
}

/// Visibility and interactivity are the base of the score; accessibility
/// signals add, tiny geometry and occlusion subtract.
fn confidence_score(node: &EnhancedNode) -> f64 {
    let mut score: f64 = 0.0;
    if node.is_visible {
        score += 0.3;
    }
    if node.is_interactive {
        score += 0.3;
    }
    if node.ax_role.is_some() {
        score += 0.2;
    }
    if !node.ax_name.is_empty() {
        score += 0.1;
    }
    if node.ax_focusable {
        score += 0.1;
    }
    if node.bounds_css.width < SMALL_DIMENSION_PX || node.bounds_css.height < SMALL_DIMENSION_PX {
        score -= 0.2;
    }
    if node.is_occluded {
        score -= 0.3;
    }
    score.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Occlusion
// ---------------------------------------------------------------------------

/// Cell size of the spatial hash used by occlusion detection.
const GRID_CELL: f64 = 256.0;

/// Uniform grid over node bounds, so candidate-vs-obstacle comparison does
/// not degenerate to O(N^2) on element-heavy pages.
struct GridIndex {
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl GridIndex {
    fn build(rects: impl Iterator<Item = (usize, Rect)>) -> Self {
        let mut buckets: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (index, rect) in rects {
            for cell in Self::cells(&rect) {
                buckets.entry(cell).or_default().push(index);
            }
        }
        Self { buckets }
    }

    fn cells(rect: &Rect) -> Vec<(i64, i64)> {
        let x0 = (rect.x / GRID_CELL).floor() as i64;
        let y0 = (rect.y / GRID_CELL).floor() as i64;
        let x1 = ((rect.x + rect.width) / GRID_CELL).floor() as i64;
        let y1 = ((rect.y + rect.height) / GRID_CELL).floor() as i64;
        let mut cells = Vec::new();
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                cells.push((cx, cy));
            }
        }
        cells
    }

    /// Indices of every entry whose cells overlap the query rect, sorted and
    /// deduplicated for deterministic iteration.
    fn query(&self, rect: &Rect) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for cell in Self::cells(rect) {
            if let Some(bucket) = self.buckets.get(&cell) {
                for &index in bucket {
                    if seen.insert(index) {
                        hits.push(index);
                    }
                }
            }
        }
        hits.sort_unstable();
        hits
    }
}

/// Mark candidates covered >90% (by intersection-area ratio) by a node
/// painted above them. Obstacles with pointer-events:none or near-zero
/// opacity never occlude.
fn detect_occlusion(candidates: &mut [Candidate]) {
    let obstacles: Vec<(usize, Rect)> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.node.is_visible && c.node.bounds_css.area() > 0.0)
        .map(|(i, c)| (i, c.node.bounds_css))
        .collect();
    let grid = GridIndex::build(obstacles.into_iter());

    for i in 0..candidates.len() {
        if !candidates[i].node.is_visible || !candidates[i].node.is_interactive {
            continue;
        }
        let bounds = candidates[i].node.bounds_css;
        let area = bounds.area();
        if area <= 0.0 {
            continue;
        }
        let paint_order = candidates[i].node.paint_order;

        for j in grid.query(&bounds) {
            if i == j {
                continue;
            }
            let obstacle = &candidates[j];
            if obstacle.node.paint_order <= paint_order {
                continue;
            }
            if obstacle.pointer_events_none {
                continue;
            }
            if obstacle.opacity < OCCLUSION_MIN_OPACITY {
                continue;
            }

            let coverage = bounds.intersection_area(&obstacle.node.bounds_css) / area;
            if coverage > OCCLUSION_COVERAGE {
                candidates[i].node.is_occluded = true;
                candidates[i].node.is_clickable = false;
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -- Fixture builders ---------------------------------------------------

    /// Build a DOMSnapshot payload from (backend_id, bounds, styles, paint).
    /// Styles are (prop, value) pairs limited to COMPUTED_STYLE_PROPS.
    fn snapshot_fixture(entries: &[(i64, [f64; 4], &[(&str, &str)], i64)]) -> Value {
        let mut strings: Vec<String> = Vec::new();
        let mut intern = |s: &str, strings: &mut Vec<String>| -> i64 {
            if let Some(pos) = strings.iter().position(|e| e == s) {
                pos as i64
            } else {
                strings.push(s.to_string());
                (strings.len() - 1) as i64
            }
        };

        let mut backend_ids = Vec::new();
        let mut node_index = Vec::new();
        let mut bounds = Vec::new();
        let mut styles = Vec::new();
        let mut paint_orders = Vec::new();

        for (row, (backend_id, rect, style_pairs, paint)) in entries.iter().enumerate() {
            backend_ids.push(*backend_id);
            node_index.push(row as i64);
            bounds.push(rect.to_vec());

            let mut row_styles = vec![-1i64; COMPUTED_STYLE_PROPS.len()];
            for (prop, value) in *style_pairs {
                let pos = COMPUTED_STYLE_PROPS
                    .iter()
                    .position(|p| p == prop)
                    .unwrap_or_else(|| panic!("unknown style prop in fixture: {prop}"));
                row_styles[pos] = intern(value, &mut strings);
            }
            styles.push(row_styles);
            paint_orders.push(*paint);
        }

        json!({
            "documents": [{
                "nodes": { "backendNodeId": backend_ids },
                "layout": {
                    "nodeIndex": node_index,
                    "bounds": bounds,
                    "styles": styles,
                    "paintOrders": paint_orders,
                },
            }],
            "strings": strings,
        })
    }

    fn ax_fixture(entries: &[(i64, &str, &str, bool)]) -> Value {
        let nodes: Vec<Value> = entries
            .iter()
            .map(|(backend_id, role, name, focusable)| {
                json!({
                    "backendDOMNodeId": backend_id,
                    "role": { "value": role },
                    "name": { "value": name },
                    "properties": [
                        { "name": "focusable", "value": { "value": focusable } },
                    ],
                })
            })
            .collect();
        json!({ "nodes": nodes })
    }

    fn element(backend_id: i64, tag: &str, attrs: &[(&str, &str)], children: Vec<Value>) -> Value {
        let attr_list: Vec<Value> = attrs
            .iter()
            .flat_map(|(k, v)| [json!(k), json!(v)])
            .collect();
        json!({
            "nodeType": 1,
            "nodeName": tag.to_uppercase(),
            "backendNodeId": backend_id,
            "attributes": attr_list,
            "children": children,
        })
    }

    fn text(value: &str) -> Value {
        json!({ "nodeType": 3, "nodeValue": value })
    }

    fn document(children: Vec<Value>) -> Value {
        json!({
            "root": {
                "nodeType": 9,
                "nodeName": "#document",
                "backendNodeId": 1,
                "frameId": "MAIN_FRAME",
                "children": children,
            }
        })
    }

    fn raw(dom: Value, snapshot: Value, ax: Option<Value>) -> RawSnapshot {
        RawSnapshot {
            dom: Some(dom),
            snapshot: Some(snapshot),
            ax,
            viewport: Viewport {
                width: 1280.0,
                height: 720.0,
            },
            device_pixel_ratio: 1.0,
            missing_sources: Vec::new(),
        }
    }

    // -- Static button (scenario: one obvious control) ----------------------

    #[test]
    fn test_single_button_merges_all_sources() {
        let dom = document(vec![element(
            10,
            "button",
            &[("id", "go")],
            vec![text("Go")],
        )]);
        let snapshot = snapshot_fixture(&[(10, [100.0, 200.0, 80.0, 30.0], &[("cursor", "pointer")], 1)]);
        let ax = ax_fixture(&[(10, "button", "Go", true)]);

        let nodes = merge(&raw(dom, snapshot, Some(ax)), &MergeOptions::default());
        assert_eq!(nodes.len(), 1);

        let node = &nodes[0];
        assert_eq!(node.backend_node_id, 10);
        assert_eq!(node.tag_name, "button");
        assert_eq!(node.ax_role.as_deref(), Some("button"));
        assert_eq!(node.ax_name, "Go");
        assert!((node.click_point.x - 140.0).abs() < 0.001);
        assert!((node.click_point.y - 215.0).abs() < 0.001);
        assert_eq!(node.action_type, ActionType::Click);
        // visible + interactive + role + name + focusable
        assert!(node.confidence >= 0.8);
        assert_eq!(node.frame_id.as_deref(), Some("MAIN_FRAME"));
    }

    // -- Cursor-pointer div (modern SPA pattern) ----------------------------

    #[test]
    fn test_cursor_pointer_div_is_interactive() {
        let dom = document(vec![
            element(20, "div", &[("data-x", "")], vec![text("Buy")]),
            element(21, "div", &[], vec![text("Plain")]),
        ]);
        let snapshot = snapshot_fixture(&[
            (20, [10.0, 10.0, 100.0, 40.0], &[("cursor", "pointer")], 2),
            (21, [10.0, 60.0, 100.0, 40.0], &[("cursor", "auto")], 1),
        ]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        // The pointer-cursor div appears; the default-cursor one does not.
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].backend_node_id, 20);
        assert!(nodes[0].is_interactive);
        assert_eq!(nodes[0].action_type, ActionType::Click);
        assert!(nodes[0].confidence >= 0.6);
    }

    // -- pointer-events: none veto ------------------------------------------

    #[test]
    fn test_pointer_events_none_is_never_clickable() {
        let dom = document(vec![element(30, "button", &[], vec![text("Ghost")])]);
        let snapshot = snapshot_fixture(&[(
            30,
            [0.0, 0.0, 100.0, 40.0],
            &[("pointer-events", "none")],
            1,
        )]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        // The tag makes it interactive in general, but pointer-events: none
        // vetoes interactivity outright.
        assert!(nodes.is_empty());
    }

    // -- Occlusion ----------------------------------------------------------

    #[test]
    fn test_occluded_button_flagged_but_present() {
        let dom = document(vec![
            element(40, "button", &[], vec![text("Covered")]),
            element(41, "div", &[], vec![]),
        ]);
        // Fixed overlay fully covers the button and paints above it.
        let snapshot = snapshot_fixture(&[
            (40, [0.0, 0.0, 100.0, 40.0], &[], 1),
            (41, [0.0, 0.0, 1280.0, 720.0], &[("position", "fixed")], 9),
        ]);
        let ax = ax_fixture(&[(40, "button", "Covered", true)]);

        let nodes = merge(&raw(dom, snapshot, Some(ax)), &MergeOptions::default());
        assert_eq!(nodes.len(), 1);
        let node = &nodes[0];
        assert!(node.is_occluded);
        assert!(!node.is_clickable);
        // 0.3 + 0.3 + 0.2 + 0.1 + 0.1 - 0.3 occlusion
        assert!((node.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_pointer_events_none_overlay_does_not_occlude() {
        let dom = document(vec![
            element(40, "button", &[], vec![text("Reachable")]),
            element(41, "div", &[], vec![]),
        ]);
        let snapshot = snapshot_fixture(&[
            (40, [0.0, 0.0, 100.0, 40.0], &[], 1),
            (
                41,
                [0.0, 0.0, 1280.0, 720.0],
                &[("pointer-events", "none")],
                9,
            ),
        ]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].is_occluded);
        assert!(nodes[0].is_clickable);
    }

    #[test]
    fn test_partial_cover_is_not_occlusion() {
        let dom = document(vec![
            element(40, "button", &[], vec![text("Half")]),
            element(41, "div", &[], vec![]),
        ]);
        // Obstacle covers only half the button: below the 90% threshold.
        let snapshot = snapshot_fixture(&[
            (40, [0.0, 0.0, 100.0, 40.0], &[], 1),
            (41, [0.0, 0.0, 50.0, 40.0], &[], 9),
        ]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].is_occluded);
    }

    #[test]
    fn test_transparent_overlay_does_not_occlude() {
        let dom = document(vec![
            element(40, "button", &[], vec![]),
            element(41, "div", &[], vec![]),
        ]);
        let snapshot = snapshot_fixture(&[
            (40, [0.0, 0.0, 100.0, 40.0], &[], 1),
            (41, [0.0, 0.0, 1280.0, 720.0], &[("opacity", "0.05")], 9),
        ]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].is_occluded);
    }

    // -- Degraded sources ---------------------------------------------------

    #[test]
    fn test_missing_ax_tree_degrades_gracefully() {
        let dom = document(vec![element(50, "button", &[], vec![text("Go")])]);
        let snapshot = snapshot_fixture(&[(50, [10.0, 10.0, 80.0, 30.0], &[], 1)]);

        let with_ax = merge(
            &raw(
                dom.clone(),
                snapshot.clone(),
                Some(ax_fixture(&[(50, "button", "Go", true)])),
            ),
            &MergeOptions::default(),
        );
        let without_ax = merge(&raw(dom, snapshot, None), &MergeOptions::default());

        // Element survives either way; confidence drops without AX signals.
        assert_eq!(with_ax.len(), 1);
        assert_eq!(without_ax.len(), 1);
        assert!(without_ax[0].confidence < with_ax[0].confidence);
        assert!(without_ax[0].confidence > 0.0);
    }

    #[test]
    fn test_missing_snapshot_yields_no_candidates() {
        let dom = document(vec![element(50, "button", &[], vec![])]);
        let raw = RawSnapshot {
            dom: Some(dom),
            snapshot: None,
            ax: None,
            viewport: Viewport::default(),
            device_pixel_ratio: 1.0,
            missing_sources: vec!["snapshot".into()],
        };
        assert!(merge(&raw, &MergeOptions::default()).is_empty());
    }

    // -- Geometry -----------------------------------------------------------

    #[test]
    fn test_device_pixel_conversion() {
        let dom = document(vec![element(60, "button", &[], vec![])]);
        let snapshot = snapshot_fixture(&[(60, [200.0, 400.0, 160.0, 60.0], &[], 1)]);
        let mut raw = raw(dom, snapshot, None);
        raw.device_pixel_ratio = 2.0;

        let nodes = merge(&raw, &MergeOptions::default());
        assert_eq!(nodes.len(), 1);
        let b = nodes[0].bounds_css;
        assert!((b.x - 100.0).abs() < f64::EPSILON);
        assert!((b.y - 200.0).abs() < f64::EPSILON);
        assert!((b.width - 80.0).abs() < f64::EPSILON);
        assert!((b.height - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_small_element_survives_only_with_penalty() {
        let dom = document(vec![
            element(70, "button", &[], vec![]),
            element(71, "div", &[], vec![]),
        ]);
        // 70: tiny but a real button (0.3+0.3-0.2 = 0.4, survives).
        // 71: tiny pointer div (0.3+0.3-0.2 = 0.4, survives) -- then raise
        // min_confidence and both drop.
        let snapshot = snapshot_fixture(&[
            (70, [10.0, 10.0, 3.0, 3.0], &[], 1),
            (71, [30.0, 10.0, 3.0, 3.0], &[("cursor", "pointer")], 1),
        ]);

        let nodes = merge(&raw(dom.clone(), snapshot.clone(), None), &MergeOptions::default());
        assert_eq!(nodes.len(), 2);
        for node in &nodes {
            assert!((node.confidence - 0.4).abs() < 1e-9);
        }

        let strict = merge(
            &raw(dom, snapshot, None),
            &MergeOptions {
                min_confidence: 0.5,
            },
        );
        assert!(strict.is_empty());
    }

    #[test]
    fn test_offscreen_element_invisible() {
        let dom = document(vec![element(80, "button", &[], vec![])]);
        let snapshot = snapshot_fixture(&[(80, [2000.0, 10.0, 80.0, 30.0], &[], 1)]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_edge_touching_element_click_point_stays_in_viewport() {
        // A rect starting exactly at the right viewport edge is not
        // classified off-screen, so its click point must still land inside
        // [0, w] x [0, h].
        let dom = document(vec![element(82, "button", &[], vec![])]);
        let snapshot = snapshot_fixture(&[(82, [1280.0, 100.0, 80.0, 30.0], &[], 1)]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        for node in &nodes {
            if node.is_visible {
                assert!(node.click_point.x >= 0.0 && node.click_point.x <= 1280.0);
                assert!(node.click_point.y >= 0.0 && node.click_point.y <= 720.0);
            }
        }
    }

    #[test]
    fn test_display_none_invisible() {
        let dom = document(vec![element(81, "button", &[], vec![])]);
        let snapshot =
            snapshot_fixture(&[(81, [10.0, 10.0, 80.0, 30.0], &[("display", "none")], 1)]);
        assert!(merge(&raw(dom, snapshot, None), &MergeOptions::default()).is_empty());
    }

    // -- Action classification ----------------------------------------------

    #[test]
    fn test_action_classification() {
        let dom = document(vec![
        element(90, "input", &[("type", "email")], vec![]),
            element(91, "input", &[("type", "checkbox")], vec![]),
            element(92, "input", &[("type", "submit")], vec![]),
            element(93, "select", &[], vec![]),
            element(94, "textarea", &[], vec![]),
            element(95, "a", &[("href", "/x")], vec![text("link")]),
        ]);
        let snapshot = snapshot_fixture(&[
            (90, [0.0, 0.0, 100.0, 20.0], &[], 1),
            (91, [0.0, 30.0, 20.0, 20.0], &[], 1),
            (92, [0.0, 60.0, 100.0, 20.0], &[], 1),
            (93, [0.0, 90.0, 100.0, 20.0], &[], 1),
            (94, [0.0, 120.0, 100.0, 60.0], &[], 1),
            (95, [0.0, 190.0, 100.0, 20.0], &[], 1),
        ]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        let by_id: HashMap<i64, &EnhancedNode> =
            nodes.iter().map(|n| (n.backend_node_id, n)).collect();

        assert_eq!(by_id[&90].action_type, ActionType::Input);
        assert_eq!(by_id[&91].action_type, ActionType::Toggle);
        assert_eq!(by_id[&92].action_type, ActionType::Click);
        assert_eq!(by_id[&93].action_type, ActionType::Select);
        assert_eq!(by_id[&94].action_type, ActionType::Input);
        assert_eq!(by_id[&95].action_type, ActionType::Click);
    }

    #[test]
    fn test_ax_role_classification_without_tags() {
        let dom = document(vec![
            element(100, "div", &[], vec![]),
            element(101, "div", &[], vec![]),
        ]);
        let snapshot = snapshot_fixture(&[
            (100, [0.0, 0.0, 100.0, 20.0], &[], 1),
            (101, [0.0, 30.0, 100.0, 20.0], &[], 1),
        ]);
        let ax = ax_fixture(&[
            (100, "textbox", "Search", true),
            (101, "switch", "Dark mode", true),
        ]);

        let nodes = merge(&raw(dom, snapshot, Some(ax)), &MergeOptions::default());
        let by_id: HashMap<i64, &EnhancedNode> =
            nodes.iter().map(|n| (n.backend_node_id, n)).collect();
        assert_eq!(by_id[&100].action_type, ActionType::Input);
        assert_eq!(by_id[&101].action_type, ActionType::Toggle);
    }

    // -- Ranking & determinism ----------------------------------------------

    #[test]
    fn test_ranking_confidence_then_reading_order() {
        let dom = document(vec![
            element(110, "div", &[], vec![]),
            element(111, "button", &[], vec![]),
            element(112, "button", &[], vec![]),
        ]);
        let snapshot = snapshot_fixture(&[
            (110, [0.0, 300.0, 100.0, 30.0], &[("cursor", "pointer")], 1),
            (111, [200.0, 50.0, 100.0, 30.0], &[], 1),
            (112, [10.0, 50.0, 100.0, 30.0], &[], 1),
        ]);
        let ax = ax_fixture(&[(111, "button", "B", true), (112, "button", "A", true)]);

        let nodes = merge(&raw(dom, snapshot, Some(ax)), &MergeOptions::default());
        // Both buttons outrank the bare pointer div; between the equal-score
        // buttons, left-most (same row) wins.
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].backend_node_id, 112);
        assert_eq!(nodes[1].backend_node_id, 111);
        assert_eq!(nodes[2].backend_node_id, 110);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let dom = document(vec![
            element(120, "button", &[], vec![text("One")]),
            element(121, "a", &[("href", "/two")], vec![text("Two")]),
            element(122, "input", &[("type", "text")], vec![]),
        ]);
        let snapshot = snapshot_fixture(&[
            (120, [0.0, 0.0, 100.0, 30.0], &[], 3),
            (121, [0.0, 40.0, 100.0, 30.0], &[], 2),
            (122, [0.0, 80.0, 100.0, 30.0], &[], 1),
        ]);
        let ax = ax_fixture(&[
            (120, "button", "One", true),
            (121, "link", "Two", true),
            (122, "textbox", "", true),
        ]);

        let input = raw(dom, snapshot, Some(ax));
        let first = merge(&input, &MergeOptions::default());
        let second = merge(&input, &MergeOptions::default());

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.backend_node_id, b.backend_node_id);
            assert_eq!(a.confidence, b.confidence);
        }
    }

    // -- Deep DOM -----------------------------------------------------------

    #[test]
    fn test_deep_dom_does_not_overflow_stack() {
        // 10,000 nested divs with a button at the bottom.
        let mut node = element(9_999_999, "button", &[], vec![text("Deep")]);
        for depth in 0..10_000 {
            node = element(1_000_000 + depth, "div", &[], vec![node]);
        }
        let dom = document(vec![node]);
        let snapshot = snapshot_fixture(&[(9_999_999, [10.0, 10.0, 80.0, 30.0], &[], 1)]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].backend_node_id, 9_999_999);
    }

    // -- Shadow DOM / iframes -----------------------------------------------

    #[test]
    fn test_shadow_roots_and_content_documents_walked() {
        let shadow_button = element(130, "button", &[], vec![text("Shadowed")]);
        let host = json!({
            "nodeType": 1,
            "nodeName": "DIV",
            "backendNodeId": 131,
            "shadowRoots": [{
                "nodeType": 11,
                "nodeName": "#document-fragment",
                "children": [shadow_button],
            }],
        });

        let iframe_button = element(140, "button", &[], vec![text("Framed")]);
        let iframe = json!({
            "nodeType": 1,
            "nodeName": "IFRAME",
            "backendNodeId": 141,
            "frameId": "CHILD_FRAME",
            "contentDocument": {
                "nodeType": 9,
                "nodeName": "#document",
                "children": [iframe_button],
            },
        });

        let dom = document(vec![host, iframe]);
        let snapshot = snapshot_fixture(&[
            (130, [0.0, 0.0, 80.0, 30.0], &[], 1),
            (140, [0.0, 100.0, 80.0, 30.0], &[], 1),
        ]);

        let nodes = merge(&raw(dom, snapshot, None), &MergeOptions::default());
        assert_eq!(nodes.len(), 2);

        let framed = nodes
            .iter()
            .find(|n| n.backend_node_id == 140)
            .expect("iframe button present");
        assert_eq!(framed.frame_id.as_deref(), Some("CHILD_FRAME"));
        assert_eq!(framed.text_content, "Framed");
    }

    // -- Grid index ---------------------------------------------------------

    #[test]
    fn test_grid_index_finds_overlapping_only() {
        let rects = vec![
            (0, Rect::new(0.0, 0.0, 50.0, 50.0)),
            (1, Rect::new(1000.0, 1000.0, 50.0, 50.0)),
            (2, Rect::new(40.0, 40.0, 50.0, 50.0)),
        ];
        let grid = GridIndex::build(rects.into_iter());

        let hits = grid.query(&Rect::new(10.0, 10.0, 60.0, 60.0));
        assert!(hits.contains(&0));
        assert!(hits.contains(&2));
        assert!(!hits.contains(&1));
    }
}
