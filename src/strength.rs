use std::sync::Arc;

use crate::arc::ArcType;
use crate::error::{ComposeError, Result};
use crate::graph::{NodeId, NodeState, PrimIndexGraph};
use crate::layer::{Layer, LayerOffset};
use crate::path::PrimPath;

// ------------- StrengthTable -------------
/// The total strong-to-weak order over arc types. The default places
/// local opinions first, then relocates, references, payloads,
/// inherits, variants and specializes; sublayer ordering is handled
/// inside layer stacks and the tag only participates to keep the table
/// total. Deployments with different composition rules swap the order
/// in through settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrengthTable {
    rank: [u8; ArcType::ALL.len()],
}

const DEFAULT_ORDER: [ArcType; 8] = [
    ArcType::Root,
    ArcType::Relocate,
    ArcType::Reference,
    ArcType::Payload,
    ArcType::Inherit,
    ArcType::Variant,
    ArcType::Specialize,
    ArcType::Sublayer,
];

impl StrengthTable {
    fn from_order(order: &[ArcType]) -> Result<Self> {
        let mut rank = [u8::MAX; ArcType::ALL.len()];
        for (position, arc_type) in order.iter().enumerate() {
            let slot = &mut rank[*arc_type as usize];
            if *slot != u8::MAX {
                return Err(ComposeError::Config(format!(
                    "strength order lists '{}' twice",
                    arc_type.label()
                )));
            }
            *slot = position as u8;
        }
        if let Some(missing) = ArcType::ALL.iter().find(|t| rank[**t as usize] == u8::MAX) {
            return Err(ComposeError::Config(format!(
                "strength order is missing '{}'",
                missing.label()
            )));
        }
        Ok(Self { rank })
    }

    /// Builds a table from arc-type labels, strongest first. The order
    /// must mention every arc type exactly once.
    pub fn from_labels(labels: &[String]) -> Result<Self> {
        let mut order = Vec::with_capacity(labels.len());
        for label in labels {
            let arc_type = ArcType::from_label(label).ok_or_else(|| {
                ComposeError::Config(format!("unknown arc type '{label}' in strength order"))
            })?;
            order.push(arc_type);
        }
        Self::from_order(&order)
    }

    /// Smaller is stronger.
    pub fn rank(&self, arc_type: ArcType) -> u8 {
        self.rank[arc_type as usize]
    }
}

impl Default for StrengthTable {
    fn default() -> Self {
        let mut rank = [0u8; ArcType::ALL.len()];
        for (position, arc_type) in DEFAULT_ORDER.iter().enumerate() {
            rank[*arc_type as usize] = position as u8;
        }
        Self { rank }
    }
}

// ------------- PrimEntry -------------
/// One contributing opinion location in a flattened index: look in
/// `layer` at `path`, with `offset` mapping its times into the root
/// namespace. Entries are strongest first.
#[derive(Clone)]
pub struct PrimEntry {
    pub layer: Arc<dyn Layer>,
    pub path: PrimPath,
    pub offset: LayerOffset,
    pub node: NodeId,
}

impl std::fmt::Debug for PrimEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({}, {})", self.layer.identifier(), self.path)
    }
}

// ------------- Strength Orderer -------------
/// Flattens a composed node tree into the canonical strongest-first
/// opinion order. Within a node, each layer of its stack contributes
/// its own opinion first and then the subtrees of the arcs it authored,
/// so an arc in a strong layer outranks the plain opinions of weaker
/// layers in the same stack. Nodes that do not contribute (culled
/// duplicates, cycles, unloaded payloads, depth overruns) are skipped
/// along with their subtrees; layers without a spec at the node's path
/// are skipped rather than emitted empty.
pub fn flatten(graph: &PrimIndexGraph) -> Vec<PrimEntry> {
    let mut entries = Vec::new();
    emit(graph, graph.root(), LayerOffset::IDENTITY, &mut entries);
    entries
}

fn emit(graph: &PrimIndexGraph, node_id: NodeId, to_root: LayerOffset, entries: &mut Vec<PrimEntry>) {
    let node = graph.node(node_id);
    if node.state != NodeState::Expanded {
        return;
    }
    for (layer_index, (layer, layer_offset)) in node.site.stack.layers().iter().enumerate() {
        if layer.spec(&node.site.path).is_some() {
            entries.push(PrimEntry {
                layer: Arc::clone(layer),
                path: node.site.path.clone(),
                offset: to_root.compose(layer_offset),
                node: node_id,
            });
        }
        for child_id in &node.children {
            let child = graph.node(*child_id);
            if child.introducing_layer == layer_index {
                let child_to_root = to_root.compose(&child.offset_to_parent);
                emit(graph, *child_id, child_to_root, entries);
            }
        }
    }
}
