//! Human-readable and JSON renderings of a composed prim index, for
//! debugging composition behavior and for tooling that inspects it.

use std::fmt::Write as _;

use serde_json::{json, Value};

use crate::graph::{NodeId, NodeState, PrimIndex};

fn state_label(state: NodeState) -> &'static str {
    match state {
        NodeState::Expanded => "expanded",
        NodeState::Culled => "culled",
        NodeState::Cycle => "cycle",
        NodeState::Unloaded => "unloaded",
        NodeState::DepthExceeded => "depth exceeded",
    }
}

/// Indented tree of every node with its arc type, site and state,
/// followed by the flattened opinion order and the error list.
pub fn dump_text(index: &PrimIndex) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "PrimIndex {}", index.path());
    render_node(index, index.graph().root(), 1, &mut out);
    let _ = writeln!(out, "order:");
    for entry in index.entries() {
        let _ = writeln!(out, "  ({}, {})", entry.layer.identifier(), entry.path);
    }
    if !index.errors().is_empty() {
        let _ = writeln!(out, "errors:");
        for error in index.errors() {
            let _ = writeln!(out, "  {error}");
        }
    }
    out
}

fn render_node(index: &PrimIndex, node_id: NodeId, indent: usize, out: &mut String) {
    let node = index.graph().node(node_id);
    let pad = "  ".repeat(indent);
    let _ = write!(
        out,
        "{pad}[{}] <{}>{}",
        node.arc_type.label(),
        node.site.root_identifier(),
        node.site.path
    );
    if node.state != NodeState::Expanded {
        let _ = write!(out, " ({})", state_label(node.state));
    }
    if let Some(origin) = node.origin {
        let _ = write!(out, " origin={}", origin.0);
    }
    let _ = writeln!(out);
    for child in &node.children {
        render_node(index, *child, indent + 1, out);
    }
}

/// The same structure as [`dump_text`], as a JSON value.
pub fn dump_json(index: &PrimIndex) -> Value {
    json!({
        "path": index.path().to_string(),
        "graph": node_json(index, index.graph().root()),
        "order": index
            .entries()
            .iter()
            .map(|entry| json!({
                "layer": entry.layer.identifier(),
                "path": entry.path.to_string(),
                "offset": { "offset": entry.offset.offset, "scale": entry.offset.scale },
            }))
            .collect::<Vec<_>>(),
        "errors": index
            .errors()
            .iter()
            .map(|error| error.to_string())
            .collect::<Vec<_>>(),
        "dependencies": index.dependencies().collect::<Vec<_>>(),
    })
}

fn node_json(index: &PrimIndex, node_id: NodeId) -> Value {
    let node = index.graph().node(node_id);
    json!({
        "arc": node.arc_type.label(),
        "layer_stack": node.site.root_identifier(),
        "path": node.site.path.to_string(),
        "state": state_label(node.state),
        "direct": node.direct,
        "children": node
            .children
            .iter()
            .map(|child| node_json(index, *child))
            .collect::<Vec<_>>(),
    })
}
