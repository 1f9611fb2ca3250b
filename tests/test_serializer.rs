//! Integration tests for merge-then-serialize: index round-trips and the
//! cross-frame selector map.

mod common;

use common::{ax_fixture, document, element, layout_row, raw_snapshot, snapshot_fixture, text};
use periscope_dom::{merge, serialize_dom, MergeOptions, SerializeOptions};
use periscope_types::ActionType;

#[test]
fn serialized_indices_resolve_to_same_backend_nodes() {
    let dom = document(
        "MAIN",
        vec![
            element(10, "button", &[], vec![text("Save")]),
            element(11, "a", &[("href", "/help")], vec![text("Help")]),
            element(12, "input", &[("type", "search")], vec![]),
        ],
    );
    let snapshot = snapshot_fixture(&[
        layout_row(10, [0.0, 0.0, 80.0, 30.0], &[], 3),
        layout_row(11, [0.0, 40.0, 80.0, 30.0], &[], 2),
        layout_row(12, [0.0, 80.0, 200.0, 30.0], &[], 1),
    ]);
    let ax = ax_fixture(&[
        (10, "button", "Save", true),
        (11, "link", "Help", true),
        (12, "searchbox", "Search", true),
    ]);

    let nodes = merge(&raw_snapshot(dom, snapshot, Some(ax)), &MergeOptions::default());
    let out = serialize_dom(&nodes, &SerializeOptions::default());

    // Parse `[i]` back out of every line; each must resolve through the map
    // to the node the line was rendered from.
    for (line_no, line) in out.text.lines().enumerate() {
        let index: usize = line
            .trim_start()
            .trim_start_matches('[')
            .split(']')
            .next()
            .expect("line starts with [index]")
            .parse()
            .expect("index is numeric");
        assert_eq!(index, line_no + 1);

        let entry = out.selector_map.get(&index).expect("entry for index");
        assert_eq!(entry.backend_node_id, nodes[line_no].backend_node_id);
        assert_eq!(entry.action_type, nodes[line_no].action_type);
    }
}

#[test]
fn cross_frame_nodes_keep_their_frame_ids() {
    // Parent page with a same-process iframe carrying a form, like a
    // search widget embedded in the page.
    let iframe_doc = serde_json::json!({
        "nodeType": 9,
        "nodeName": "#document",
        "children": [
            element(20, "input", &[("name", "q")], vec![]),
            element(21, "button", &[], vec![text("Search")]),
        ],
    });
    let mut iframe = element(22, "iframe", &[], vec![]);
    iframe["frameId"] = serde_json::json!("WIDGET_FRAME");
    iframe["contentDocument"] = iframe_doc;

    let dom = document(
        "MAIN",
        vec![element(23, "button", &[], vec![text("Top")]), iframe],
    );
    let snapshot = snapshot_fixture(&[
        layout_row(20, [10.0, 110.0, 200.0, 24.0], &[], 1),
        layout_row(21, [220.0, 110.0, 80.0, 24.0], &[], 1),
        layout_row(23, [10.0, 10.0, 80.0, 24.0], &[], 1),
    ]);
    let ax = ax_fixture(&[
        (20, "textbox", "q", true),
        (21, "button", "Search", true),
        (23, "button", "Top", true),
    ]);

    let nodes = merge(&raw_snapshot(dom, snapshot, Some(ax)), &MergeOptions::default());
    let out = serialize_dom(&nodes, &SerializeOptions::default());

    assert_eq!(out.selector_map.len(), 3);

    let frame_of = |backend_id: i64| {
        out.selector_map
            .values()
            .find(|e| e.backend_node_id == backend_id)
            .and_then(|e| e.frame_id.clone())
    };
    assert_eq!(frame_of(23).as_deref(), Some("MAIN"));
    assert_eq!(frame_of(20).as_deref(), Some("WIDGET_FRAME"));
    assert_eq!(frame_of(21).as_deref(), Some("WIDGET_FRAME"));

    let input_entry = out
        .selector_map
        .values()
        .find(|e| e.backend_node_id == 20)
        .unwrap();
    assert_eq!(input_entry.action_type, ActionType::Input);
}

#[test]
fn equal_rank_elements_keep_reading_order_across_runs() {
    // Three identical-scoring buttons laid out left to right.
    let dom = document(
        "MAIN",
        vec![
            element(30, "button", &[], vec![text("C")]),
            element(31, "button", &[], vec![text("A")]),
            element(32, "button", &[], vec![text("B")]),
        ],
    );
    let snapshot = snapshot_fixture(&[
        layout_row(30, [300.0, 50.0, 80.0, 30.0], &[], 1),
        layout_row(31, [10.0, 50.0, 80.0, 30.0], &[], 1),
        layout_row(32, [150.0, 50.0, 80.0, 30.0], &[], 1),
    ]);
    let ax = ax_fixture(&[
        (30, "button", "C", true),
        (31, "button", "A", true),
        (32, "button", "B", true),
    ]);

    let raw = raw_snapshot(dom, snapshot, Some(ax));
    for _ in 0..3 {
        let nodes = merge(&raw, &MergeOptions::default());
        let out = serialize_dom(&nodes, &SerializeOptions::default());
        let order: Vec<i64> = (1..=3).map(|i| out.selector_map[&i].backend_node_id).collect();
        assert_eq!(order, vec![31, 32, 30]);
    }
}
