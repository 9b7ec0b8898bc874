use crate::arc::ArcType;
use crate::graph::{NodeId, PrimIndexGraph};
use crate::path::PrimPath;

// ------------- MapFunction -------------
/// The path substitution one arc establishes between a node's namespace
/// and its parent's: paths under `target` (the node side) correspond to
/// paths under `source` (the parent side). A variant arc's target
/// carries the selection component, so mapping to the parent also
/// removes it.
#[derive(Clone, Debug, Default)]
pub struct MapFunction {
    source: PrimPath,
    target: PrimPath,
}

impl MapFunction {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn new(source: PrimPath, target: PrimPath) -> Self {
        Self { source, target }
    }

    pub fn source(&self) -> &PrimPath {
        &self.source
    }

    pub fn target(&self) -> &PrimPath {
        &self.target
    }

    /// `None` when the path lies outside what the arc exposes.
    pub fn map_to_parent(&self, path: &PrimPath) -> Option<PrimPath> {
        path.replace_prefix(&self.target, &self.source)
    }

    pub fn map_to_child(&self, path: &PrimPath) -> Option<PrimPath> {
        path.replace_prefix(&self.source, &self.target)
    }
}

// ------------- Path Translator -------------
/// Maps `path`, expressed in `node`'s namespace, into the root
/// namespace. At each hop toward the root the arc's prefix substitution
/// applies first, then any relocation declared in the parent's stack.
/// `None` is the expected outcome for paths an arc does not expose
/// (callers treat those as local-only); it is never an error.
pub fn translate_to_root(
    graph: &PrimIndexGraph,
    node: NodeId,
    path: &PrimPath,
) -> Option<PrimPath> {
    let mut translated = path.clone();
    let mut current = node;
    while let Some(parent) = graph.node(current).parent {
        translated = graph.node(current).map_to_parent.map_to_parent(&translated)?;
        // a relocate node's own map already performs the rename
        if graph.node(current).arc_type != ArcType::Relocate {
            translated = apply_relocations(graph, parent, &translated, Direction::Forward);
        }
        current = parent;
    }
    Some(translated)
}

/// The inverse of [`translate_to_root`]: maps a root-namespace path into
/// `node`'s namespace, undoing relocations before each arc hop.
pub fn translate_from_root(
    graph: &PrimIndexGraph,
    node: NodeId,
    path: &PrimPath,
) -> Option<PrimPath> {
    let mut chain = Vec::new();
    let mut current = node;
    while let Some(parent) = graph.node(current).parent {
        chain.push((current, parent));
        current = parent;
    }
    let mut translated = path.clone();
    for (hop, parent) in chain.into_iter().rev() {
        if graph.node(hop).arc_type != ArcType::Relocate {
            translated = apply_relocations(graph, parent, &translated, Direction::Backward);
        }
        translated = graph.node(hop).map_to_parent.map_to_child(&translated)?;
    }
    Some(translated)
}

/// Translation for relationship targets and connections: identical to
/// [`translate_to_root`] except variant-selection components are always
/// removed, since targets must never encode selections.
pub fn translate_target_to_root(
    graph: &PrimIndexGraph,
    node: NodeId,
    path: &PrimPath,
) -> Option<PrimPath> {
    translate_to_root(graph, node, path).map(|p| p.stripped_of_variants())
}

enum Direction {
    Forward,
    Backward,
}

fn apply_relocations(
    graph: &PrimIndexGraph,
    node: NodeId,
    path: &PrimPath,
    direction: Direction,
) -> PrimPath {
    for (_, source, target) in graph.node(node).site.stack.relocations() {
        let (from, to) = match direction {
            Direction::Forward => (source, target),
            Direction::Backward => (target, source),
        };
        if let Some(renamed) = path.replace_prefix(from, to) {
            return renamed;
        }
    }
    path.clone()
}
