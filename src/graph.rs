use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::arc::{classify, ArcTarget, ArcType, CompositionArc, VariantSelections};
use crate::error::{ComposeError, CompositionError, CompositionErrorKind, Result};
use crate::interface::CancelToken;
use crate::layer::{
    Fingerprint, LayerOffset, LayerStack, LayerStackKeeper, OtherHasher, Permission, Resolver,
    Site, SiteHasher, SiteKey,
};
use crate::path::{PathComponent, PrimPath};
use crate::strength::{flatten, PrimEntry, StrengthTable};
use crate::translate::{self, MapFunction};

// ------------- Nodes -------------
/// Index of a node within one prim index graph. Node identity is
/// positional; ids are meaningless across graphs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub u32);

/// Terminal state of one branch of the composition.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeState {
    /// Contributes opinions and was recursively expanded.
    Expanded,
    /// Fully shadowed by an equivalent, stronger contribution.
    Culled,
    /// The arc closed a loop over its ancestors; branch abandoned.
    Cycle,
    /// A payload present but not loaded under the current policy.
    Unloaded,
    /// Expansion stopped at the configured recursion limit.
    DepthExceeded,
}

/// A vertex of the composition graph: one (layer stack, path) site and
/// the arc that mounted it under its parent. Owned by the arena in
/// [`PrimIndexGraph`]; children are ids, never pointers.
#[derive(Debug)]
pub struct Node {
    pub arc_type: ArcType,
    pub site: Site,
    pub map_to_parent: MapFunction,
    pub offset_to_parent: LayerOffset,
    /// Index of the layer (in the parent's stack) that authored the arc.
    pub introducing_layer: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// For culled duplicates, the node that owns the contribution.
    pub origin: Option<NodeId>,
    pub state: NodeState,
    /// Direct arcs are authored at the composed path; ancestral arcs
    /// come from the parent location's composition.
    pub direct: bool,
}

impl Node {
    pub fn contributes_opinions(&self) -> bool {
        self.state == NodeState::Expanded
    }
}

/// The arena owning every node of one composed prim index. Freed as a
/// whole together with the index.
#[derive(Debug, Default)]
pub struct PrimIndexGraph {
    nodes: Vec<Node>,
}

impl PrimIndexGraph {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }
}

// ------------- PrimIndex -------------
/// The finished, strength-ordered composition result for one path:
/// the node graph, its flattened opinion order, every branch-local
/// error, and the set of layers the result depends on. Immutable and
/// shared once built.
pub struct PrimIndex {
    path: PrimPath,
    graph: PrimIndexGraph,
    entries: Vec<PrimEntry>,
    errors: Vec<CompositionError>,
    fingerprints: Vec<(String, Fingerprint)>,
}

impl PrimIndex {
    pub fn path(&self) -> &PrimPath {
        &self.path
    }

    pub fn graph(&self) -> &PrimIndexGraph {
        &self.graph
    }

    /// Contributing opinion sites, strongest first.
    pub fn entries(&self) -> &[PrimEntry] {
        &self.entries
    }

    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// Identifiers of every layer this index depends on, sorted.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.fingerprints.iter().map(|(id, _)| id.as_str())
    }

    /// `(layer identifier, content fingerprint)` pairs, sorted by
    /// identifier, capturing exactly what the index was built from.
    pub fn fingerprints(&self) -> &[(String, Fingerprint)] {
        &self.fingerprints
    }

    /// Strongest authored value for `name`, the "last opinion wins"
    /// lookup every downstream consumer performs.
    pub fn resolve_field(&self, name: &str) -> Option<(String, &PrimEntry)> {
        for entry in &self.entries {
            if let Some(spec) = entry.layer.spec(&entry.path) {
                if let Some(value) = spec.field(name) {
                    return Some((value.to_owned(), entry));
                }
            }
        }
        None
    }

    pub fn translate_path_to_root(&self, node: NodeId, path: &PrimPath) -> Option<PrimPath> {
        translate::translate_to_root(&self.graph, node, path)
    }

    pub fn translate_path_from_root(&self, node: NodeId, path: &PrimPath) -> Option<PrimPath> {
        translate::translate_from_root(&self.graph, node, path)
    }

    pub fn translate_target_path_to_root(&self, node: NodeId, path: &PrimPath) -> Option<PrimPath> {
        translate::translate_target_to_root(&self.graph, node, path)
    }
}

// ------------- Builder -------------
/// Everything one build needs, passed explicitly so independent builds
/// can run in parallel without shared mutable state.
pub struct ComposeRequest<'a> {
    pub root_stack: Arc<LayerStack>,
    pub path: PrimPath,
    pub selections: &'a VariantSelections,
    /// The already-composed index of the parent path, source of the
    /// ancestral arcs. `None` when composing the absolute root.
    pub parent_index: Option<&'a PrimIndex>,
    pub resolver: &'a dyn Resolver,
    pub stacks: &'a Mutex<LayerStackKeeper>,
    pub table: &'a StrengthTable,
    pub max_depth: usize,
    pub include_payloads: bool,
    pub cancel: &'a CancelToken,
}

/// Composes the prim index for `request.path`. Branch-local problems
/// land in the index's error list; only cancellation and poisoned locks
/// fail the call itself.
pub fn compose_prim_index(request: ComposeRequest) -> Result<PrimIndex> {
    debug!(path = %request.path, "composing prim index");
    let child_component = request.path.last_component().cloned();
    let mut builder = Builder {
        selections: request.selections,
        resolver: request.resolver,
        stacks: request.stacks,
        table: request.table,
        max_depth: request.max_depth,
        include_payloads: request.include_payloads,
        cancel: request.cancel,
        child_component,
        graph: PrimIndexGraph::default(),
        errors: Vec::new(),
        visited: Vec::new(),
        expanded: HashMap::default(),
        seen_stacks: HashSet::default(),
        dep_layers: HashMap::default(),
    };

    builder.note_stack(&request.root_stack);
    let root_site = Site::new(Arc::clone(&request.root_stack), request.path.clone());
    let root_key = root_site.key();
    let root_id = builder.alloc(Node {
        arc_type: ArcType::Root,
        site: root_site,
        map_to_parent: MapFunction::identity(),
        offset_to_parent: LayerOffset::IDENTITY,
        introducing_layer: 0,
        parent: None,
        children: Vec::new(),
        origin: None,
        state: NodeState::Expanded,
        direct: true,
    });
    builder.expanded.insert(root_key.clone(), (root_id, LayerOffset::IDENTITY));
    builder.visited.push(root_key);
    let ancestral = request
        .parent_index
        .map(|parent| (parent.graph(), parent.graph().root()));
    builder.expand(root_id, ancestral, 0, LayerOffset::IDENTITY)?;
    builder.visited.pop();

    let entries = flatten(&builder.graph);
    let mut fingerprints: Vec<(String, Fingerprint)> =
        builder.dep_layers.into_iter().collect();
    if let Some(parent) = request.parent_index {
        for (identifier, fingerprint) in parent.fingerprints() {
            if !fingerprints.iter().any(|(id, _)| id == identifier) {
                fingerprints.push((identifier.clone(), *fingerprint));
            }
        }
    }
    fingerprints.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(PrimIndex {
        path: request.path,
        graph: builder.graph,
        entries,
        errors: builder.errors,
        fingerprints,
    })
}

/// A child waiting to be mounted: either a direct arc found by the
/// classifier, or the ancestral image of a node in the parent index.
enum ChildSource<'g> {
    Direct(CompositionArc),
    Ancestral {
        parent_graph: &'g PrimIndexGraph,
        node: NodeId,
    },
}

struct ChildDesc<'g> {
    arc_type: ArcType,
    introducing_layer: usize,
    author_order: usize,
    direct: bool,
    source: ChildSource<'g>,
}

struct Builder<'a> {
    selections: &'a VariantSelections,
    resolver: &'a dyn Resolver,
    stacks: &'a Mutex<LayerStackKeeper>,
    table: &'a StrengthTable,
    max_depth: usize,
    include_payloads: bool,
    cancel: &'a CancelToken,
    child_component: Option<PathComponent>,
    graph: PrimIndexGraph,
    errors: Vec<CompositionError>,
    /// Sites on the path back to the root; only these count as cycles.
    visited: Vec<SiteKey>,
    /// Every site already contributing, with its offset to the root;
    /// later arrivals are culled (ancestral opinion suppression).
    expanded: HashMap<SiteKey, (NodeId, LayerOffset), SiteHasher>,
    seen_stacks: HashSet<Fingerprint, OtherHasher>,
    dep_layers: HashMap<String, Fingerprint, OtherHasher>,
}

impl<'a> Builder<'a> {
    fn alloc(&mut self, node: Node) -> NodeId {
        let parent = node.parent;
        let id = NodeId(self.graph.nodes.len() as u32);
        self.graph.nodes.push(node);
        if let Some(parent) = parent {
            self.graph.nodes[parent.0 as usize].children.push(id);
        }
        id
    }

    /// Records a stack's layers as dependencies and surfaces its
    /// construction errors, once per distinct stack.
    fn note_stack(&mut self, stack: &Arc<LayerStack>) {
        if !self.seen_stacks.insert(stack.identity()) {
            return;
        }
        self.errors.extend(stack.errors().iter().cloned());
        for (layer, _) in stack.layers() {
            self.dep_layers
                .insert(layer.identifier().to_owned(), layer.content_fingerprint());
        }
    }

    fn expand(
        &mut self,
        node_id: NodeId,
        ancestral: Option<(&PrimIndexGraph, NodeId)>,
        depth: usize,
        offset_to_root: LayerOffset,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ComposeError::Cancelled);
        }
        let site = self.graph.node(node_id).site.clone();
        if depth >= self.max_depth {
            self.graph.nodes[node_id.0 as usize].state = NodeState::DepthExceeded;
            self.errors.push(CompositionError::new(
                site.path,
                self.graph.node(node_id).arc_type,
                CompositionErrorKind::MaxDepthExceeded,
            ));
            return Ok(());
        }

        let classified = classify(&site, self.table, self.selections);
        self.errors.extend(classified.errors);

        let mut children: Vec<ChildDesc> = classified
            .arcs
            .into_iter()
            .map(|arc| ChildDesc {
                arc_type: arc.arc_type,
                introducing_layer: arc.introducing_layer,
                author_order: arc.author_order,
                direct: true,
                source: ChildSource::Direct(arc),
            })
            .collect();
        if let Some((parent_graph, paired)) = ancestral {
            for (position, child_id) in parent_graph.node(paired).children.iter().enumerate() {
                let child = parent_graph.node(*child_id);
                if child.state != NodeState::Expanded {
                    continue;
                }
                children.push(ChildDesc {
                    arc_type: child.arc_type,
                    introducing_layer: child.introducing_layer,
                    author_order: position,
                    direct: false,
                    source: ChildSource::Ancestral {
                        parent_graph,
                        node: *child_id,
                    },
                });
            }
        }
        // direct arcs outrank their ancestral siblings of the same class
        children.sort_by_key(|c| {
            (
                c.introducing_layer,
                self.table.rank(c.arc_type),
                usize::from(!c.direct),
                c.author_order,
            )
        });

        for child in children {
            match child.source {
                ChildSource::Direct(arc) => {
                    self.mount_direct(node_id, arc, depth, offset_to_root)?;
                }
                ChildSource::Ancestral { parent_graph, node } => {
                    self.mount_ancestral(node_id, parent_graph, node, depth, offset_to_root)?;
                }
            }
        }
        Ok(())
    }

    fn mount_direct(
        &mut self,
        parent_id: NodeId,
        arc: CompositionArc,
        depth: usize,
        offset_to_root: LayerOffset,
    ) -> Result<()> {
        let parent_site = self.graph.node(parent_id).site.clone();
        let (stack, target_path) = match &arc.target {
            ArcTarget::Internal { path } => (Arc::clone(&parent_site.stack), path.clone()),
            ArcTarget::External { asset, path } => {
                let layer = match self.resolver.resolve_layer(asset) {
                    Ok(layer) => layer,
                    Err(reason) => {
                        debug!(asset = %asset, %reason, "arc target did not resolve");
                        self.errors.push(CompositionError::new(
                            arc.source_path.clone(),
                            arc.arc_type,
                            CompositionErrorKind::ArcResolution { reason },
                        ));
                        return Ok(());
                    }
                };
                let stack = {
                    let mut keeper = self
                        .stacks
                        .lock()
                        .map_err(|e| ComposeError::Lock(e.to_string()))?;
                    keeper.stack_for(layer, self.resolver).0
                };
                (stack, path.clone())
            }
        };
        self.note_stack(&stack);
        let child_site = Site::new(stack, target_path);
        let map = MapFunction::new(arc.source_path.clone(), child_site.path.clone());
        self.mount(
            parent_id,
            arc.arc_type,
            child_site,
            map,
            arc.offset,
            arc.introducing_layer,
            true,
            None,
            depth,
            offset_to_root,
        )
    }

    fn mount_ancestral(
        &mut self,
        parent_id: NodeId,
        parent_graph: &PrimIndexGraph,
        paired_id: NodeId,
        depth: usize,
        offset_to_root: LayerOffset,
    ) -> Result<()> {
        let Some(component) = self.child_component.clone() else {
            return Ok(());
        };
        let paired = parent_graph.node(paired_id);
        let child_site = Site::new(
            Arc::clone(&paired.site.stack),
            paired.site.path.appended(component),
        );
        self.note_stack(&child_site.stack);
        self.mount(
            parent_id,
            paired.arc_type,
            child_site,
            paired.map_to_parent.clone(),
            paired.offset_to_parent,
            paired.introducing_layer,
            false,
            Some((parent_graph, paired_id)),
            depth,
            offset_to_root,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn mount(
        &mut self,
        parent_id: NodeId,
        arc_type: ArcType,
        child_site: Site,
        map: MapFunction,
        offset_to_parent: LayerOffset,
        introducing_layer: usize,
        direct: bool,
        ancestral: Option<(&PrimIndexGraph, NodeId)>,
        depth: usize,
        offset_to_root: LayerOffset,
    ) -> Result<()> {
        let key = child_site.key();
        let child_offset = offset_to_root.compose(&offset_to_parent);

        if self.visited.contains(&key) {
            self.errors.push(CompositionError::new(
                child_site.path.clone(),
                arc_type,
                CompositionErrorKind::Cycle,
            ));
            self.alloc(Node {
                arc_type,
                site: child_site,
                map_to_parent: map,
                offset_to_parent,
                introducing_layer,
                parent: Some(parent_id),
                children: Vec::new(),
                origin: None,
                state: NodeState::Cycle,
                direct,
            });
            return Ok(());
        }

        if let Some((first_id, first_offset)) = self.expanded.get(&key).copied() {
            if !child_offset.approx_eq(&first_offset) {
                self.errors.push(CompositionError::new(
                    child_site.path.clone(),
                    arc_type,
                    CompositionErrorKind::ConflictingOffsets,
                ));
            }
            self.alloc(Node {
                arc_type,
                site: child_site,
                map_to_parent: map,
                offset_to_parent,
                introducing_layer,
                parent: Some(parent_id),
                children: Vec::new(),
                origin: Some(first_id),
                state: NodeState::Culled,
                direct,
            });
            return Ok(());
        }

        if direct && arc_type != ArcType::Root && self.is_private(&child_site) {
            self.errors.push(CompositionError::new(
                child_site.path.clone(),
                arc_type,
                CompositionErrorKind::PermissionDenied,
            ));
            self.alloc(Node {
                arc_type,
                site: child_site,
                map_to_parent: map,
                offset_to_parent,
                introducing_layer,
                parent: Some(parent_id),
                children: Vec::new(),
                origin: None,
                state: NodeState::Culled,
                direct,
            });
            return Ok(());
        }

        if arc_type == ArcType::Payload && !self.include_payloads {
            self.alloc(Node {
                arc_type,
                site: child_site,
                map_to_parent: map,
                offset_to_parent,
                introducing_layer,
                parent: Some(parent_id),
                children: Vec::new(),
                origin: None,
                state: NodeState::Unloaded,
                direct,
            });
            return Ok(());
        }

        let child_id = self.alloc(Node {
            arc_type,
            site: child_site,
            map_to_parent: map,
            offset_to_parent,
            introducing_layer,
            parent: Some(parent_id),
            children: Vec::new(),
            origin: None,
            state: NodeState::Expanded,
            direct,
        });
        self.expanded.insert(key.clone(), (child_id, child_offset));
        self.visited.push(key);
        self.expand(child_id, ancestral, depth + 1, child_offset)?;
        self.visited.pop();
        Ok(())
    }

    /// Strongest authored permission at the site decides.
    fn is_private(&self, site: &Site) -> bool {
        for (layer, _) in site.stack.layers() {
            if let Some(spec) = layer.spec(&site.path) {
                if spec.field("permission").is_some() {
                    return spec.permission() == Permission::Private;
                }
            }
        }
        false
    }
}
