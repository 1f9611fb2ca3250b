//! Shared fixture builders for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use serde_json::{json, Value};

use periscope_types::{RawSnapshot, Viewport, COMPUTED_STYLE_PROPS};

/// One layout row for the snapshot fixture: backend id, device-pixel
/// bounds, computed style pairs, paint order.
pub struct LayoutRow<'a> {
    pub backend_id: i64,
    pub bounds: [f64; 4],
    pub styles: &'a [(&'a str, &'a str)],
    pub paint_order: i64,
}

pub fn layout_row<'a>(
    backend_id: i64,
    bounds: [f64; 4],
    styles: &'a [(&'a str, &'a str)],
    paint_order: i64,
) -> LayoutRow<'a> {
    LayoutRow {
        backend_id,
        bounds,
        styles,
        paint_order,
    }
}

/// Build a `DOMSnapshot.captureSnapshot`-shaped payload.
pub fn snapshot_fixture(rows: &[LayoutRow<'_>]) -> Value {
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

    for (row_no, row) in rows.iter().enumerate() {
        backend_ids.push(row.backend_id);
        node_index.push(row_no as i64);
        bounds.push(row.bounds.to_vec());

        let mut row_styles = vec![-1i64; COMPUTED_STYLE_PROPS.len()];
        for (prop, value) in row.styles {
            let pos = COMPUTED_STYLE_PROPS
                .iter()
                .position(|p| p == prop)
                .unwrap_or_else(|| panic!("unknown style prop in fixture: {prop}"));
            row_styles[pos] = intern(value, &mut strings);
        }
        styles.push(row_styles);
        paint_orders.push(row.paint_order);
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

/// Build an `Accessibility.getFullAXTree`-shaped payload from
/// (backend id, role, name, focusable) tuples.
pub fn ax_fixture(entries: &[(i64, &str, &str, bool)]) -> Value {
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

/// An element node in the flattened-DOM shape of `DOM.getDocument`.
pub fn element(backend_id: i64, tag: &str, attrs: &[(&str, &str)], children: Vec<Value>) -> Value {
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

/// A text node.
pub fn text(value: &str) -> Value {
    json!({ "nodeType": 3, "nodeValue": value })
}

/// A document root owning `frame_id`.
pub fn document(frame_id: &str, children: Vec<Value>) -> Value {
    json!({
        "root": {
            "nodeType": 9,
            "nodeName": "#document",
            "backendNodeId": 1,
            "frameId": frame_id,
            "children": children,
        }
    })
}

/// Assemble a full raw snapshot with a 1280x720 viewport and DPR 1.
pub fn raw_snapshot(dom: Value, snapshot: Value, ax: Option<Value>) -> RawSnapshot {
    let missing = if ax.is_none() {
        vec!["ax".to_string()]
    } else {
        Vec::new()
    };
    RawSnapshot {
        dom: Some(dom),
        snapshot: Some(snapshot),
        ax,
        viewport: Viewport {
            width: 1280.0,
            height: 720.0,
        },
        device_pixel_ratio: 1.0,
        missing_sources: missing,
    }
}
