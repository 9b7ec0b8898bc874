use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use roaring::RoaringBitmap;
use tracing::{debug, info};

use crate::arc::VariantSelections;
use crate::error::{ComposeError, Result};
use crate::graph::PrimIndex;
use crate::layer::{LayerRegistry, OtherHasher};
use crate::path::PrimPath;

// ------------- CacheKey -------------
/// A prim index is memoized per (path, variant selections in effect).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CacheKey {
    pub path: PrimPath,
    pub selections: VariantSelections,
}

// ------------- Single flight -------------
/// Completion signal for one in-progress build. Callers that lose the
/// race wait here instead of duplicating the computation.
struct Flight {
    done: Mutex<bool>,
    ready: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    fn finish(&self) {
        if let Ok(mut done) = self.done.lock() {
            *done = true;
        }
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<()> {
        let mut done = self
            .done
            .lock()
            .map_err(|e| ComposeError::Lock(e.to_string()))?;
        while !*done {
            done = self
                .ready
                .wait(done)
                .map_err(|e| ComposeError::Lock(e.to_string()))?;
        }
        Ok(())
    }
}

enum Slot {
    Ready {
        index: Arc<PrimIndex>,
        deps: RoaringBitmap,
    },
    InFlight(Arc<Flight>),
}

enum Role {
    Builder(Arc<Flight>),
    Waiter(Arc<Flight>),
}

// ------------- PrimIndexCache -------------
/// Memoizes composed prim indexes and owns their invalidation. `get` is
/// at-most-once-computed per key between invalidations: concurrent
/// requesters of the same key share one build, requesters of other keys
/// proceed independently. Eviction is explicit; there is no automatic
/// replacement policy at this level.
pub struct PrimIndexCache {
    enabled: bool,
    kept: Mutex<HashMap<CacheKey, Slot, OtherHasher>>,
    registry: Mutex<LayerRegistry>,
    /// Bumped by every invalidation so builds that raced one never
    /// publish a stale entry.
    epoch: AtomicU64,
    build_count: AtomicU64,
}

impl PrimIndexCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            kept: Mutex::new(HashMap::default()),
            registry: Mutex::new(LayerRegistry::new()),
            epoch: AtomicU64::new(0),
            build_count: AtomicU64::new(0),
        }
    }

    /// Number of builds that actually ran (cache misses included,
    /// cache hits not). Observability hook for tests and callers.
    pub fn build_count(&self) -> u64 {
        self.build_count.load(Ordering::Relaxed)
    }

    /// Number of finished entries currently kept.
    pub fn len(&self) -> usize {
        match self.kept.lock() {
            Ok(kept) => kept
                .values()
                .filter(|slot| matches!(slot, Slot::Ready { .. }))
                .count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_build<F>(&self, key: CacheKey, build: F) -> Result<Arc<PrimIndex>>
    where
        F: FnOnce() -> Result<PrimIndex>,
    {
        if !self.enabled {
            let index = Arc::new(build()?);
            self.build_count.fetch_add(1, Ordering::Relaxed);
            return Ok(index);
        }
        loop {
            let role = {
                let mut kept = self
                    .kept
                    .lock()
                    .map_err(|e| ComposeError::Lock(e.to_string()))?;
                match kept.get(&key) {
                    Some(Slot::Ready { index, .. }) => {
                        debug!(path = %key.path, "prim index cache hit");
                        return Ok(Arc::clone(index));
                    }
                    Some(Slot::InFlight(flight)) => Role::Waiter(Arc::clone(flight)),
                    None => {
                        let flight = Arc::new(Flight::new());
                        kept.insert(key.clone(), Slot::InFlight(Arc::clone(&flight)));
                        Role::Builder(flight)
                    }
                }
            };
            match role {
                Role::Waiter(flight) => {
                    flight.wait()?;
                    // the build finished or was abandoned; re-check
                }
                Role::Builder(flight) => {
                    let epoch = self.epoch.load(Ordering::SeqCst);
                    let result = build();
                    let outcome = self.publish(&key, result, epoch);
                    flight.finish();
                    return outcome;
                }
            }
        }
    }

    fn publish(
        &self,
        key: &CacheKey,
        result: Result<PrimIndex>,
        epoch: u64,
    ) -> Result<Arc<PrimIndex>> {
        let mut kept = self
            .kept
            .lock()
            .map_err(|e| ComposeError::Lock(e.to_string()))?;
        match result {
            Ok(index) => {
                let index = Arc::new(index);
                self.build_count.fetch_add(1, Ordering::Relaxed);
                if self.epoch.load(Ordering::SeqCst) == epoch {
                    let deps = self.intern_dependencies(&index)?;
                    kept.insert(
                        key.clone(),
                        Slot::Ready {
                            index: Arc::clone(&index),
                            deps,
                        },
                    );
                } else {
                    // an invalidation raced this build; hand the result
                    // out but do not memoize it
                    kept.remove(key);
                }
                Ok(index)
            }
            Err(error) => {
                kept.remove(key);
                Err(error)
            }
        }
    }

    fn intern_dependencies(&self, index: &PrimIndex) -> Result<RoaringBitmap> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|e| ComposeError::Lock(e.to_string()))?;
        let mut deps = RoaringBitmap::new();
        for identifier in index.dependencies() {
            deps.insert(registry.intern(identifier));
        }
        Ok(deps)
    }

    /// Drops every entry whose dependency set includes `identifier`.
    /// Returns how many entries were evicted.
    pub fn invalidate(&self, identifier: &str) -> Result<usize> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let id = {
            let registry = self
                .registry
                .lock()
                .map_err(|e| ComposeError::Lock(e.to_string()))?;
            registry.id(identifier)
        };
        let Some(id) = id else {
            return Ok(0);
        };
        let mut kept = self
            .kept
            .lock()
            .map_err(|e| ComposeError::Lock(e.to_string()))?;
        let before = kept.len();
        kept.retain(|_, slot| match slot {
            Slot::Ready { deps, .. } => !deps.contains(id),
            Slot::InFlight(_) => true,
        });
        let removed = before - kept.len();
        info!(layer = identifier, removed, "invalidated prim index cache entries");
        Ok(removed)
    }

    /// Drops every finished entry.
    pub fn invalidate_all(&self) -> Result<()> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut kept = self
            .kept
            .lock()
            .map_err(|e| ComposeError::Lock(e.to_string()))?;
        kept.retain(|_, slot| matches!(slot, Slot::InFlight(_)));
        info!("cleared prim index cache");
        Ok(())
    }
}
