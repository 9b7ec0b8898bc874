//! Threaded interface for submitting and controlling index builds.
//!
//! This module provides a minimal, thread-per-build runner that accepts
//! composition requests, executes them on a background thread, and hands
//! the finished index back through a channel. It uses cooperative
//! cancellation via an `Arc<AtomicBool>`: the builder checks the token at
//! node-expansion boundaries only, so cancellation is prompt but never
//! interrupts an arc mid-flight.
//!
//! The goal is to keep threading concerns here without invasive changes
//! to the engine. Callers can submit builds and cancel them by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::arc::VariantSelections;
use crate::engine::Engine;
use crate::error::Result;
use crate::graph::PrimIndex;
use crate::path::PrimPath;

/// Cancellation token shared with the worker thread.
#[derive(Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Clone for CancelToken {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Opaque build identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildId(u64);

/// Handle to a running or completed build.
pub struct BuildHandle {
    pub id: BuildId,
    cancel: CancelToken,
    started: Instant,
    join: Option<JoinHandle<()>>,
    pub result: Receiver<Result<Arc<PrimIndex>>>,
}

impl BuildHandle {
    /// Request cancellation (cooperative). The worker may take a short
    /// time to observe it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    /// Wait for the build to finish and take its result.
    pub fn join(mut self) -> Result<Arc<PrimIndex>> {
        let result = self
            .result
            .recv()
            .map_err(|e| crate::error::ComposeError::Lock(e.to_string()));
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        result?
    }
    /// Elapsed time since submission.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Registry managing build lifecycles over a shared engine.
pub struct ComposeInterface {
    engine: Arc<Engine>,
    next_id: Mutex<u64>,
    active: Mutex<HashMap<BuildId, CancelToken>>, // for external cancellation
}

impl ComposeInterface {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            next_id: Mutex::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    fn allocate_id(&self) -> BuildId {
        let mut guard = self.next_id.lock().unwrap_or_else(|p| p.into_inner());
        *guard += 1;
        BuildId(*guard)
    }

    /// Submit a prim index build for execution on a background thread.
    pub fn start_build(&self, path: PrimPath, selections: VariantSelections) -> BuildHandle {
        let id = self.allocate_id();
        let cancel = CancelToken::new();
        if let Ok(mut active) = self.active.lock() {
            active.insert(id, cancel.clone());
        }

        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(&self.engine);
        let cancel_for_thread = cancel.clone();
        let join = std::thread::spawn(move || {
            let result = engine.compute_prim_index_with(&path, &selections, &cancel_for_thread);
            if let Err(error) = &result {
                warn!(%path, %error, "background build failed");
            }
            let _ = tx.send(result);
        });

        BuildHandle {
            id,
            cancel,
            started: Instant::now(),
            join: Some(join),
            result: rx,
        }
    }

    /// Run a build synchronously on the current thread.
    pub fn run_sync(
        &self,
        path: &PrimPath,
        selections: &VariantSelections,
    ) -> Result<Arc<PrimIndex>> {
        self.engine.compute_prim_index(path, selections)
    }

    /// Cancel a build by id.
    pub fn cancel(&self, id: BuildId) -> bool {
        match self.active.lock() {
            Ok(active) => {
                if let Some(token) = active.get(&id) {
                    token.cancel();
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        }
    }
}
