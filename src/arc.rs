use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::error::{CompositionError, CompositionErrorKind};
use crate::layer::{ArcFields, LayerOffset, OtherHasher, Site};
use crate::path::PrimPath;
use crate::strength::StrengthTable;

/// Variant selections in effect for a build, keyed by variant-set name.
/// Ordered so the same selections always produce the same cache key.
pub type VariantSelections = BTreeMap<String, String>;

// ------------- ArcType -------------
/// The closed set of composition arcs. Strength between siblings is
/// decided by a [`StrengthTable`] indexed by this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArcType {
    Root,
    Sublayer,
    Relocate,
    Reference,
    Payload,
    Inherit,
    Variant,
    Specialize,
}

impl ArcType {
    pub const ALL: [ArcType; 8] = [
        ArcType::Root,
        ArcType::Sublayer,
        ArcType::Relocate,
        ArcType::Reference,
        ArcType::Payload,
        ArcType::Inherit,
        ArcType::Variant,
        ArcType::Specialize,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ArcType::Root => "root",
            ArcType::Sublayer => "sublayer",
            ArcType::Relocate => "relocate",
            ArcType::Reference => "reference",
            ArcType::Payload => "payload",
            ArcType::Inherit => "inherit",
            ArcType::Variant => "variant",
            ArcType::Specialize => "specialize",
        }
    }

    pub fn from_label(label: &str) -> Option<ArcType> {
        ArcType::ALL.into_iter().find(|t| t.label() == label)
    }
}

// ------------- CompositionArc -------------
/// Where an arc's opinions come from.
#[derive(Clone, Debug)]
pub enum ArcTarget {
    /// A different layer stack, named by an authored asset identifier.
    External { asset: String, path: PrimPath },
    /// A different path within the introducing layer stack.
    Internal { path: PrimPath },
}

/// One composition edge, extracted from authored metadata. Transient:
/// arcs only live while the graph builder turns them into nodes.
#[derive(Clone, Debug)]
pub struct CompositionArc {
    pub arc_type: ArcType,
    /// The path the arc is authored at, in the introducing namespace.
    pub source_path: PrimPath,
    pub target: ArcTarget,
    pub offset: LayerOffset,
    /// Index of the authoring layer within the introducing stack.
    pub introducing_layer: usize,
    /// Authoring position within that layer's list of this arc class.
    pub author_order: usize,
    /// Direct arcs are authored at the requested path; ancestral arcs
    /// come from composing a parent location.
    pub direct: bool,
}

/// Result of scanning one site for arcs. Malformed entries become
/// errors here instead of aborting the scan.
#[derive(Default)]
pub struct ClassifiedArcs {
    pub arcs: Vec<CompositionArc>,
    pub errors: Vec<CompositionError>,
}

// ------------- Arc Classifier -------------
/// Scans every layer of `site`'s stack (strong to weak) for composition
/// metadata at `site.path` and returns the arcs in expansion order:
/// authoring layer first, then arc-type strength, then authoring order.
pub fn classify(
    site: &Site,
    table: &StrengthTable,
    selections: &VariantSelections,
) -> ClassifiedArcs {
    let mut result = ClassifiedArcs::default();
    let path = &site.path;
    let per_layer: Vec<ArcFields> = site
        .stack
        .layers()
        .iter()
        .map(|(layer, _)| layer.arc_fields(path))
        .collect();

    let mut seen_variant_sets: HashSet<String, OtherHasher> = HashSet::default();
    for (layer_index, fields) in per_layer.iter().enumerate() {
        for (order, reference) in fields.references.iter().enumerate() {
            push_ref_arc(
                &mut result,
                ArcType::Reference,
                path,
                reference,
                layer_index,
                order,
            );
        }
        for (order, payload) in fields.payloads.iter().enumerate() {
            push_ref_arc(&mut result, ArcType::Payload, path, payload, layer_index, order);
        }
        for (order, target) in fields.inherits.iter().enumerate() {
            push_internal_arc(&mut result, ArcType::Inherit, path, target, layer_index, order);
        }
        for (order, target) in fields.specializes.iter().enumerate() {
            push_internal_arc(
                &mut result,
                ArcType::Specialize,
                path,
                target,
                layer_index,
                order,
            );
        }
        for (order, set) in fields.variant_sets.iter().enumerate() {
            if !seen_variant_sets.insert(set.name.clone()) {
                // a stronger layer already declared this set
                continue;
            }
            let selection = selections
                .get(&set.name)
                .map(String::as_str)
                .or_else(|| authored_selection(&per_layer, &set.name))
                .or_else(|| set.variants.first().map(String::as_str));
            let Some(selection) = selection else {
                warn!(set = %set.name, path = %path, "variant set without variants");
                result.errors.push(CompositionError::new(
                    path.clone(),
                    ArcType::Variant,
                    CompositionErrorKind::MalformedArc {
                        reason: format!("variant set '{}' has no variants", set.name),
                    },
                ));
                continue;
            };
            result.arcs.push(CompositionArc {
                arc_type: ArcType::Variant,
                source_path: path.clone(),
                target: ArcTarget::Internal {
                    path: path.with_variant(&set.name, selection),
                },
                offset: LayerOffset::IDENTITY,
                introducing_layer: layer_index,
                author_order: order,
                direct: true,
            });
        }
    }

    for (order, (layer_index, source, target)) in site.stack.relocations().iter().enumerate() {
        if target == path {
            result.arcs.push(CompositionArc {
                arc_type: ArcType::Relocate,
                source_path: path.clone(),
                target: ArcTarget::Internal {
                    path: source.clone(),
                },
                offset: LayerOffset::IDENTITY,
                introducing_layer: *layer_index,
                author_order: order,
                direct: true,
            });
        }
    }

    result
        .arcs
        .sort_by_key(|arc| (arc.introducing_layer, table.rank(arc.arc_type), arc.author_order));
    result
}

fn authored_selection<'a>(per_layer: &'a [ArcFields], set: &str) -> Option<&'a str> {
    for fields in per_layer {
        for (name, selection) in &fields.variant_selections {
            if name == set {
                return Some(selection.as_str());
            }
        }
    }
    None
}

fn push_ref_arc(
    result: &mut ClassifiedArcs,
    arc_type: ArcType,
    path: &PrimPath,
    reference: &crate::layer::CompositionRef,
    layer_index: usize,
    order: usize,
) {
    if let Some(asset) = &reference.asset {
        if asset.is_empty() {
            warn!(path = %path, "{} with empty target layer identifier", arc_type.label());
            result.errors.push(CompositionError::new(
                path.clone(),
                arc_type,
                CompositionErrorKind::MalformedArc {
                    reason: "empty target layer identifier".to_owned(),
                },
            ));
            return;
        }
    }
    if reference.target.is_root() {
        result.errors.push(CompositionError::new(
            path.clone(),
            arc_type,
            CompositionErrorKind::MalformedArc {
                reason: "target path must name a namespace entry".to_owned(),
            },
        ));
        return;
    }
    let target = match &reference.asset {
        Some(asset) => ArcTarget::External {
            asset: asset.clone(),
            path: reference.target.clone(),
        },
        None => ArcTarget::Internal {
            path: reference.target.clone(),
        },
    };
    result.arcs.push(CompositionArc {
        arc_type,
        source_path: path.clone(),
        target,
        offset: reference.offset,
        introducing_layer: layer_index,
        author_order: order,
        direct: true,
    });
}

fn push_internal_arc(
    result: &mut ClassifiedArcs,
    arc_type: ArcType,
    path: &PrimPath,
    target: &PrimPath,
    layer_index: usize,
    order: usize,
) {
    if target.is_root() {
        result.errors.push(CompositionError::new(
            path.clone(),
            arc_type,
            CompositionErrorKind::MalformedArc {
                reason: "target path must name a namespace entry".to_owned(),
            },
        ));
        return;
    }
    result.arcs.push(CompositionArc {
        arc_type,
        source_path: path.clone(),
        target: ArcTarget::Internal {
            path: target.clone(),
        },
        offset: LayerOffset::IDENTITY,
        introducing_layer: layer_index,
        author_order: order,
        direct: true,
    });
}
