//! Serializes the merged element list into the LLM-facing text inventory
//! plus the 1-based selector map.
//!
//! One line per element:
//!
//! ```text
//! [1]<button> role="button" name="Go" text="Go" action=click
//!   [2]<input> role="textbox" name="Search" action=input
//! ```
//!
//! Subframe elements are indented one level. The serializer never mutates
//! its input; it is a pure function of the merged list.

use periscope_types::{EnhancedNode, SelectorEntry, SelectorMap};

/// Options for one serialization pass.
#[derive(Debug, Clone)]
pub struct SerializeOptions {
    /// Hard cap on emitted lines; the remainder is summarized.
    pub max_lines: usize,
    /// Truncation threshold for names and text.
    pub max_text_len: usize,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            max_lines: 400,
            max_text_len: 80,
        }
    }
}

/// Serialized inventory: the text block and the index-addressed map.
#[derive(Debug, Clone)]
pub struct SerializedDom {
    pub text: String,
    pub selector_map: SelectorMap,
}

/// Render the ranked node list. Indices are 1-based and stable only for the
/// snapshot they were produced from.
pub fn serialize_dom(nodes: &[EnhancedNode], opts: &SerializeOptions) -> SerializedDom {
    let mut lines: Vec<String> = Vec::new();
    let mut selector_map = SelectorMap::new();

    // The first node's frame is treated as the main document; anything else
    // is a subframe and gets indented.
    let main_frame = nodes.first().and_then(|n| n.frame_id.clone());

    for (i, node) in nodes.iter().enumerate() {
        let index = i + 1;

        let label = if node.ax_name.is_empty() {
            truncate(&node.text_content, opts.max_text_len)
        } else {
            truncate(&node.ax_name, opts.max_text_len)
        };

        selector_map.insert(
            index,
            SelectorEntry {
                backend_node_id: node.backend_node_id,
                session_id: None,
                frame_id: node.frame_id.clone(),
                bounds_css: node.bounds_css,
                click_point: node.click_point,
                action_type: node.action_type,
                tag: node.tag_name.clone(),
                label,
            },
        );

        if lines.len() < opts.max_lines {
            lines.push(render_line(node, index, &main_frame, opts));
            if lines.len() == opts.max_lines && index < nodes.len() {
                lines.push(format!(
                    "... truncated {} additional elements",
                    nodes.len() - index
                ));
            }
        }
    }

    SerializedDom {
        text: lines.join("\n"),
        selector_map,
    }
}

fn render_line(
    node: &EnhancedNode,
    index: usize,
    main_frame: &Option<String>,
    opts: &SerializeOptions,
) -> String {
    let indent = if node.frame_id != *main_frame { "  " } else { "" };

    let mut line = format!("{indent}[{index}]<{}>", node.tag_name);

    if let Some(role) = &node.ax_role {
        line.push_str(&format!(" role=\"{}\"", truncate(role, opts.max_text_len)));
    }
    if !node.ax_name.is_empty() {
        line.push_str(&format!(
            " name=\"{}\"",
            truncate(&node.ax_name, opts.max_text_len)
        ));
    }
    let text = node.text_content.trim();
    if !text.is_empty() && text != node.ax_name {
        line.push_str(&format!(" text=\"{}\"", truncate(text, opts.max_text_len)));
    }
    line.push_str(&format!(" action={}", node.action_type));

    if node.is_occluded {
        line.push_str(" occluded");
    } else if !node.is_clickable && node.action_type == periscope_types::ActionType::Click {
        line.push_str(" disabled");
    }

    line
}

fn truncate(value: &str, max_len: usize) -> String {
    let value = value.trim();
    if value.chars().count() <= max_len {
        return value.to_string();
    }
    let kept: String = value.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
