use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use bimap::BiMap;
use seahash::SeaHasher;

use crate::arc::ArcType;
use crate::error::{ComposeError, CompositionError, CompositionErrorKind, Result};
use crate::path::PrimPath;

// we will use a fast hashing algo for hashmaps and hashsets where keys
// are paths, identifiers or site fingerprints
pub type SiteHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// ------------- Fingerprint -------------
/// Content fingerprint of a layer (or identity of a layer stack).
/// Opaque to composition; compared and stored, never interpreted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn from_hasher(hasher: blake3::Hasher) -> Self {
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ------------- LayerOffset -------------
/// Time offset and scale a layer is mounted with. Composes
/// multiplicatively along nested arcs and sublayers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerOffset {
    pub offset: f64,
    pub scale: f64,
}

impl LayerOffset {
    pub const IDENTITY: LayerOffset = LayerOffset {
        offset: 0.0,
        scale: 1.0,
    };

    pub fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    /// The offset obtained by applying `self` after `inner`:
    /// `t -> self(inner(t))`.
    pub fn compose(&self, inner: &LayerOffset) -> LayerOffset {
        LayerOffset {
            scale: self.scale * inner.scale,
            offset: self.scale * inner.offset + self.offset,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.approx_eq(&Self::IDENTITY)
    }

    pub fn approx_eq(&self, other: &LayerOffset) -> bool {
        (self.offset - other.offset).abs() <= 1e-9 && (self.scale - other.scale).abs() <= 1e-9
    }
}

impl Default for LayerOffset {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for LayerOffset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(offset {}, scale {})", self.offset, self.scale)
    }
}

// ------------- Spec -------------
/// The authored fields of one namespace entry in one layer. Field values
/// are opaque to composition; callers interpret them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Spec {
    fields: Vec<(String, String)>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Permission {
    Public,
    Private,
}

impl Spec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: &str) {
        for field in &mut self.fields {
            if field.0 == name {
                field.1 = value.to_owned();
                return;
            }
        }
        self.fields.push((name.to_owned(), value.to_owned()));
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn permission(&self) -> Permission {
        match self.field("permission") {
            Some("private") => Permission::Private,
            _ => Permission::Public,
        }
    }
}

// ------------- Arc metadata -------------
/// A reference or payload declaration as authored in a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionRef {
    /// Identifier of the target layer; `None` targets the introducing
    /// layer stack itself (an internal reference).
    pub asset: Option<String>,
    pub target: PrimPath,
    pub offset: LayerOffset,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantSetDecl {
    pub name: String,
    pub variants: Vec<String>,
}

/// Everything composition-relevant a layer authors at one path,
/// in authoring order per list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArcFields {
    pub references: Vec<CompositionRef>,
    pub payloads: Vec<CompositionRef>,
    pub inherits: Vec<PrimPath>,
    pub specializes: Vec<PrimPath>,
    pub variant_sets: Vec<VariantSetDecl>,
    /// Authored selections, `(set, selection)` pairs.
    pub variant_selections: Vec<(String, String)>,
}

impl ArcFields {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
            && self.payloads.is_empty()
            && self.inherits.is_empty()
            && self.specializes.is_empty()
            && self.variant_sets.is_empty()
            && self.variant_selections.is_empty()
    }
}

/// A sublayer entry in a layer's root metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct SublayerDecl {
    pub identifier: String,
    pub offset: LayerOffset,
}

// ------------- Layer -------------
/// The storage collaborator. Composition sees a layer as an immutable
/// snapshot of specs and arc metadata; reading and writing the backing
/// file is somebody else's job.
pub trait Layer: Send + Sync {
    fn identifier(&self) -> &str;
    fn content_fingerprint(&self) -> Fingerprint;
    fn spec(&self, path: &PrimPath) -> Option<Spec>;
    fn arc_fields(&self, path: &PrimPath) -> ArcFields {
        let _ = path;
        ArcFields::default()
    }
    fn sublayers(&self) -> Vec<SublayerDecl> {
        Vec::new()
    }
    /// Namespace renames this layer declares, `(source, target)` pairs.
    fn relocations(&self) -> Vec<(PrimPath, PrimPath)> {
        Vec::new()
    }
}

/// The resolver collaborator: turns an authored layer identifier into a
/// layer object. Relative-to-absolute resolution and file I/O live
/// behind this seam.
pub trait Resolver: Send + Sync {
    fn resolve_layer(&self, asset: &str) -> std::result::Result<Arc<dyn Layer>, String>;
}

// ------------- LayerStack -------------
/// An ordered run of layers (strong to weak) treated as one composition
/// source: a root layer, its recursively expanded sublayers with
/// composed offsets, and optionally a session layer on top.
pub struct LayerStack {
    layers: Vec<(Arc<dyn Layer>, LayerOffset)>,
    /// `(index of the declaring layer, source, target)` renames.
    relocations: Vec<(usize, PrimPath, PrimPath)>,
    identity: Fingerprint,
    errors: Vec<CompositionError>,
}

impl LayerStack {
    pub fn build(
        root: Arc<dyn Layer>,
        session: Option<Arc<dyn Layer>>,
        resolver: &dyn Resolver,
    ) -> Self {
        let mut layers: Vec<(Arc<dyn Layer>, LayerOffset)> = Vec::new();
        let mut errors = Vec::new();
        let mut visited: HashSet<String, OtherHasher> = HashSet::default();
        if let Some(session) = session {
            visited.insert(session.identifier().to_owned());
            layers.push((session, LayerOffset::IDENTITY));
        }
        Self::descend(root, LayerOffset::IDENTITY, resolver, &mut layers, &mut visited, &mut errors);

        let mut relocations = Vec::new();
        for (index, (layer, _)) in layers.iter().enumerate() {
            for (source, target) in layer.relocations() {
                relocations.push((index, source, target));
            }
        }

        let mut hasher = blake3::Hasher::new();
        for (layer, offset) in &layers {
            hasher.update(layer.identifier().as_bytes());
            hasher.update(&[0]);
            hasher.update(&offset.offset.to_bits().to_le_bytes());
            hasher.update(&offset.scale.to_bits().to_le_bytes());
        }
        let identity = Fingerprint::from_hasher(hasher);

        Self {
            layers,
            relocations,
            identity,
            errors,
        }
    }

    fn descend(
        layer: Arc<dyn Layer>,
        offset: LayerOffset,
        resolver: &dyn Resolver,
        layers: &mut Vec<(Arc<dyn Layer>, LayerOffset)>,
        visited: &mut HashSet<String, OtherHasher>,
        errors: &mut Vec<CompositionError>,
    ) {
        if !visited.insert(layer.identifier().to_owned()) {
            errors.push(CompositionError::new(
                PrimPath::absolute_root(),
                ArcType::Sublayer,
                CompositionErrorKind::Cycle,
            ));
            return;
        }
        let sublayers = layer.sublayers();
        layers.push((layer, offset));
        for decl in sublayers {
            match resolver.resolve_layer(&decl.identifier) {
                Ok(sublayer) => {
                    let combined = offset.compose(&decl.offset);
                    Self::descend(sublayer, combined, resolver, layers, visited, errors);
                }
                Err(reason) => {
                    errors.push(CompositionError::new(
                        PrimPath::absolute_root(),
                        ArcType::Sublayer,
                        CompositionErrorKind::ArcResolution { reason },
                    ));
                }
            }
        }
    }

    /// Layers strong to weak, each with its offset relative to the
    /// stack root.
    pub fn layers(&self) -> &[(Arc<dyn Layer>, LayerOffset)] {
        &self.layers
    }

    pub fn relocations(&self) -> &[(usize, PrimPath, PrimPath)] {
        &self.relocations
    }

    /// Stack identity: a hash over constituent identifiers and offsets,
    /// usable as a cache key component.
    pub fn identity(&self) -> Fingerprint {
        self.identity
    }

    /// Problems found while expanding sublayers (cycles, unresolvable
    /// entries). The stack stays usable.
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    pub fn has_spec_at(&self, path: &PrimPath) -> bool {
        self.layers.iter().any(|(layer, _)| layer.spec(path).is_some())
    }
}

impl fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LayerStack")
            .field(
                "layers",
                &self
                    .layers
                    .iter()
                    .map(|(l, _)| l.identifier().to_owned())
                    .collect::<Vec<_>>(),
            )
            .field("identity", &self.identity.to_hex())
            .finish()
    }
}

// ------------- Site -------------
/// One (layer stack, path) pair: the location a composition node reads
/// its opinions from.
#[derive(Clone)]
pub struct Site {
    pub stack: Arc<LayerStack>,
    pub path: PrimPath,
}

/// Value identity of a site, used for dedup and cycle checks.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SiteKey(pub Fingerprint, pub PrimPath);

impl Site {
    pub fn new(stack: Arc<LayerStack>, path: PrimPath) -> Self {
        Self { stack, path }
    }

    pub fn key(&self) -> SiteKey {
        SiteKey(self.stack.identity(), self.path.clone())
    }
}

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{}>{}", self.root_identifier(), self.path)
    }
}

impl Site {
    /// Identifier of the strongest non-session layer, used for display.
    pub fn root_identifier(&self) -> &str {
        self.stack
            .layers()
            .first()
            .map(|(layer, _)| layer.identifier())
            .unwrap_or("<empty>")
    }
}

// ------------- LayerStackKeeper -------------
/// Owns the canonical layer stacks so equal stacks are shared through
/// `Arc` and compared by identity.
pub struct LayerStackKeeper {
    kept: HashMap<String, Arc<LayerStack>, OtherHasher>,
}

impl LayerStackKeeper {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
        }
    }

    /// Returns the stack rooted at `root`, building it on first use.
    /// The boolean tells whether it was previously kept.
    pub fn stack_for(
        &mut self,
        root: Arc<dyn Layer>,
        resolver: &dyn Resolver,
    ) -> (Arc<LayerStack>, bool) {
        let keepsake = root.identifier().to_owned();
        if let Some(kept) = self.kept.get(&keepsake) {
            return (Arc::clone(kept), true);
        }
        let stack = Arc::new(LayerStack::build(root, None, resolver));
        self.kept.insert(keepsake, Arc::clone(&stack));
        (stack, false)
    }

    pub fn keep(&mut self, root_identifier: &str, stack: Arc<LayerStack>) {
        self.kept.insert(root_identifier.to_owned(), stack);
    }

    pub fn len(&self) -> usize {
        self.kept.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

impl Default for LayerStackKeeper {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- LayerRegistry -------------
pub type LayerId = u32;

/// One-to-one mapping between layer identifiers and dense ids, so
/// dependency sets can be small bitmaps instead of string sets.
pub struct LayerRegistry {
    kept: BiMap<String, LayerId>,
    next: LayerId,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self {
            kept: BiMap::new(),
            next: 0,
        }
    }

    pub fn intern(&mut self, identifier: &str) -> LayerId {
        if let Some(id) = self.kept.get_by_left(identifier) {
            return *id;
        }
        let id = self.next;
        self.next += 1;
        self.kept.insert(identifier.to_owned(), id);
        id
    }

    pub fn id(&self, identifier: &str) -> Option<LayerId> {
        self.kept.get_by_left(identifier).copied()
    }

    pub fn identifier(&self, id: LayerId) -> Option<&str> {
        self.kept.get_by_right(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kept.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- InMemoryLayer -------------
/// A layer held entirely in memory. The engine's tests and quick-start
/// consumers author through this; production storage plugs in its own
/// `Layer` implementation instead.
pub struct InMemoryLayer {
    identifier: String,
    specs: Vec<(PrimPath, Spec)>,
    arcs: Vec<(PrimPath, ArcFields)>,
    sublayers: Vec<SublayerDecl>,
    relocations: Vec<(PrimPath, PrimPath)>,
}

impl InMemoryLayer {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_owned(),
            specs: Vec::new(),
            arcs: Vec::new(),
            sublayers: Vec::new(),
            relocations: Vec::new(),
        }
    }

    fn spec_mut(&mut self, path: &PrimPath) -> &mut Spec {
        if let Some(position) = self.specs.iter().position(|(p, _)| p == path) {
            return &mut self.specs[position].1;
        }
        self.specs.push((path.clone(), Spec::new()));
        &mut self.specs.last_mut().unwrap().1
    }

    fn arcs_mut(&mut self, path: &PrimPath) -> &mut ArcFields {
        if let Some(position) = self.arcs.iter().position(|(p, _)| p == path) {
            return &mut self.arcs[position].1;
        }
        self.arcs.push((path.clone(), ArcFields::default()));
        &mut self.arcs.last_mut().unwrap().1
    }

    /// Ensures a spec exists at `path` without authoring any field.
    pub fn define(&mut self, path: &PrimPath) -> &mut Self {
        self.spec_mut(path);
        self
    }

    pub fn set_field(&mut self, path: &PrimPath, name: &str, value: &str) -> &mut Self {
        self.spec_mut(path).set(name, value);
        self
    }

    pub fn add_reference(
        &mut self,
        path: &PrimPath,
        asset: Option<&str>,
        target: &PrimPath,
        offset: LayerOffset,
    ) -> &mut Self {
        self.define(path);
        self.arcs_mut(path).references.push(CompositionRef {
            asset: asset.map(str::to_owned),
            target: target.clone(),
            offset,
        });
        self
    }

    pub fn add_payload(
        &mut self,
        path: &PrimPath,
        asset: Option<&str>,
        target: &PrimPath,
        offset: LayerOffset,
    ) -> &mut Self {
        self.define(path);
        self.arcs_mut(path).payloads.push(CompositionRef {
            asset: asset.map(str::to_owned),
            target: target.clone(),
            offset,
        });
        self
    }

    pub fn add_inherit(&mut self, path: &PrimPath, target: &PrimPath) -> &mut Self {
        self.define(path);
        self.arcs_mut(path).inherits.push(target.clone());
        self
    }

    pub fn add_specialize(&mut self, path: &PrimPath, target: &PrimPath) -> &mut Self {
        self.define(path);
        self.arcs_mut(path).specializes.push(target.clone());
        self
    }

    pub fn add_variant_set(&mut self, path: &PrimPath, name: &str, variants: &[&str]) -> &mut Self {
        self.define(path);
        self.arcs_mut(path).variant_sets.push(VariantSetDecl {
            name: name.to_owned(),
            variants: variants.iter().map(|v| (*v).to_owned()).collect(),
        });
        self
    }

    pub fn select_variant(&mut self, path: &PrimPath, set: &str, selection: &str) -> &mut Self {
        self.arcs_mut(path)
            .variant_selections
            .push((set.to_owned(), selection.to_owned()));
        self
    }

    pub fn add_sublayer(&mut self, identifier: &str, offset: LayerOffset) -> &mut Self {
        self.sublayers.push(SublayerDecl {
            identifier: identifier.to_owned(),
            offset,
        });
        self
    }

    pub fn relocate(&mut self, source: &PrimPath, target: &PrimPath) -> &mut Self {
        self.relocations.push((source.clone(), target.clone()));
        self
    }

    /// Freezes the authored content into a shareable layer snapshot.
    pub fn into_layer(self) -> Arc<dyn Layer> {
        Arc::new(SealedLayer::seal(self))
    }
}

/// The immutable snapshot behind [`InMemoryLayer::into_layer`], with its
/// content fingerprint computed once at seal time.
struct SealedLayer {
    inner: InMemoryLayer,
    fingerprint: Fingerprint,
}

impl SealedLayer {
    fn seal(inner: InMemoryLayer) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(inner.identifier.as_bytes());
        for (path, spec) in &inner.specs {
            hasher.update(path.to_string().as_bytes());
            for (name, value) in spec.fields() {
                hasher.update(name.as_bytes());
                hasher.update(&[0]);
                hasher.update(value.as_bytes());
            }
        }
        for (path, arcs) in &inner.arcs {
            hasher.update(path.to_string().as_bytes());
            hasher.update(format!("{arcs:?}").as_bytes());
        }
        for decl in &inner.sublayers {
            hasher.update(decl.identifier.as_bytes());
        }
        for (source, target) in &inner.relocations {
            hasher.update(source.to_string().as_bytes());
            hasher.update(target.to_string().as_bytes());
        }
        let fingerprint = Fingerprint::from_hasher(hasher);
        Self { inner, fingerprint }
    }
}

impl Layer for SealedLayer {
    fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    fn content_fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn spec(&self, path: &PrimPath) -> Option<Spec> {
        self.inner
            .specs
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, spec)| spec.clone())
    }

    fn arc_fields(&self, path: &PrimPath) -> ArcFields {
        self.inner
            .arcs
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, fields)| fields.clone())
            .unwrap_or_default()
    }

    fn sublayers(&self) -> Vec<SublayerDecl> {
        self.inner.sublayers.clone()
    }

    fn relocations(&self) -> Vec<(PrimPath, PrimPath)> {
        self.inner.relocations.clone()
    }
}

// ------------- InMemoryResolver -------------
/// Resolver over a fixed identifier-to-layer table.
#[derive(Default)]
pub struct InMemoryResolver {
    layers: HashMap<String, Arc<dyn Layer>, OtherHasher>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: Arc<dyn Layer>) -> &mut Self {
        self.layers.insert(layer.identifier().to_owned(), layer);
        self
    }
}

impl Resolver for InMemoryResolver {
    fn resolve_layer(&self, asset: &str) -> std::result::Result<Arc<dyn Layer>, String> {
        self.layers
            .get(asset)
            .map(Arc::clone)
            .ok_or_else(|| format!("unknown layer identifier '{asset}'"))
    }
}

/// Convenience for engine constructors that accept identifiers.
pub fn resolve_root(resolver: &dyn Resolver, identifier: &str) -> Result<Arc<dyn Layer>> {
    resolver
        .resolve_layer(identifier)
        .map_err(ComposeError::RootResolution)
}
