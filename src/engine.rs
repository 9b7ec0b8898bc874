use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::arc::VariantSelections;
use crate::cache::{CacheKey, PrimIndexCache};
use crate::error::Result;
use crate::graph::{compose_prim_index, ComposeRequest, PrimIndex};
use crate::interface::CancelToken;
use crate::layer::{resolve_root, Layer, LayerStack, LayerStackKeeper, Resolver};
use crate::path::PrimPath;
use crate::settings::Settings;
use crate::strength::StrengthTable;

// ------------- Engine -------------
/// The consumer-facing composition engine: wires the root layer stack,
/// the resolver, the strength table and the prim index cache together.
/// Independent paths compose in parallel; the cache is the only point
/// of coordination.
pub struct Engine {
    root_stack: Arc<LayerStack>,
    resolver: Arc<dyn Resolver>,
    stacks: Mutex<LayerStackKeeper>,
    cache: Arc<PrimIndexCache>,
    table: StrengthTable,
    settings: Settings,
}

impl Engine {
    pub fn new(
        root: Arc<dyn Layer>,
        resolver: Arc<dyn Resolver>,
        settings: Settings,
    ) -> Result<Self> {
        Self::assemble(root, None, resolver, settings)
    }

    /// Like [`Engine::new`] with a session layer composing strongest.
    pub fn with_session(
        root: Arc<dyn Layer>,
        session: Arc<dyn Layer>,
        resolver: Arc<dyn Resolver>,
        settings: Settings,
    ) -> Result<Self> {
        Self::assemble(root, Some(session), resolver, settings)
    }

    /// Builds an engine from a root layer identifier; failing to
    /// resolve it is the one fatal resolution error.
    pub fn from_identifier(
        identifier: &str,
        resolver: Arc<dyn Resolver>,
        settings: Settings,
    ) -> Result<Self> {
        let root = resolve_root(resolver.as_ref(), identifier)?;
        Self::assemble(root, None, resolver, settings)
    }

    fn assemble(
        root: Arc<dyn Layer>,
        session: Option<Arc<dyn Layer>>,
        resolver: Arc<dyn Resolver>,
        settings: Settings,
    ) -> Result<Self> {
        let table = settings.strength_table()?;
        let root_identifier = root.identifier().to_owned();
        let root_stack = Arc::new(LayerStack::build(root, session, resolver.as_ref()));
        let mut stacks = LayerStackKeeper::new();
        stacks.keep(&root_identifier, Arc::clone(&root_stack));
        let cache = Arc::new(PrimIndexCache::new(settings.cache.enabled));
        Ok(Self {
            root_stack,
            resolver,
            stacks: Mutex::new(stacks),
            cache,
            table,
            settings,
        })
    }

    /// Composes (or returns the memoized) prim index for `path` under
    /// the given variant selections.
    pub fn compute_prim_index(
        &self,
        path: &PrimPath,
        selections: &VariantSelections,
    ) -> Result<Arc<PrimIndex>> {
        self.compute_prim_index_with(path, selections, &CancelToken::new())
    }

    /// As [`Engine::compute_prim_index`], checking `cancel` at every
    /// node-expansion boundary.
    pub fn compute_prim_index_with(
        &self,
        path: &PrimPath,
        selections: &VariantSelections,
        cancel: &CancelToken,
    ) -> Result<Arc<PrimIndex>> {
        let key = CacheKey {
            path: path.clone(),
            selections: selections.clone(),
        };
        self.cache.get_or_build(key, || {
            // the parent location composes first; its graph feeds the
            // ancestral arcs of this one
            let parent = match path.parent() {
                Some(parent_path) => {
                    Some(self.compute_prim_index_with(&parent_path, selections, cancel)?)
                }
                None => None,
            };
            debug!(path = %path, "prim index cache miss");
            compose_prim_index(ComposeRequest {
                root_stack: Arc::clone(&self.root_stack),
                path: path.clone(),
                selections,
                parent_index: parent.as_deref(),
                resolver: self.resolver.as_ref(),
                stacks: &self.stacks,
                table: &self.table,
                max_depth: self.settings.max_depth,
                include_payloads: self.settings.include_payloads,
                cancel,
            })
        })
    }

    /// Evicts every cached index that depends on `identifier`.
    pub fn invalidate(&self, identifier: &str) -> Result<usize> {
        self.cache.invalidate(identifier)
    }

    pub fn invalidate_all(&self) -> Result<()> {
        self.cache.invalidate_all()
    }

    pub fn cache(&self) -> Arc<PrimIndexCache> {
        Arc::clone(&self.cache)
    }

    pub fn root_stack(&self) -> Arc<LayerStack> {
        Arc::clone(&self.root_stack)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn strength_table(&self) -> &StrengthTable {
        &self.table
    }
}
