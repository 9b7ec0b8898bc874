//! Laminate – a composition/resolution engine for layered scene description.
//!
//! Laminate answers one question: given a set of layered, overridable
//! description files arranged through composition arcs (sublayers,
//! references, payloads, inherits, specializes, variant selections and
//! relocations), which layer opinions apply at a namespace path, and in
//! what strength order? The answer is a *prim index*:
//! * A [`layer::Layer`] is one addressable unit of authored overrides,
//!   consumed behind a trait; storage and file formats live elsewhere.
//! * A [`layer::LayerStack`] is a root layer with its recursively
//!   expanded sublayers, treated as one composition source.
//! * An [`arc::CompositionArc`] is one authored relationship between two
//!   namespace locations, tagged with a closed [`arc::ArcType`].
//! * A [`graph::PrimIndex`] is the finished, strength-ordered result for
//!   one path: a node tree, a flattened opinion order, and every
//!   branch-local composition error that occurred along the way.
//!
//! Composed node trees are owned by an arena inside each index and are
//! immutable once built, enabling lock-free sharing through `Arc`.
//!
//! ## Modules
//! * [`path`] – absolute namespace paths with variant-selection
//!   components, and their prefix algebra.
//! * [`layer`] – the layer and resolver collaborator traits, layer
//!   stacks, offsets, fingerprints and the in-memory layer.
//! * [`arc`] – arc types and the classifier that extracts arcs from
//!   authored metadata.
//! * [`strength`] – the configurable strength-order table and the
//!   flattener that produces the canonical opinion order.
//! * [`graph`] – the recursive graph builder: arc expansion, diamond
//!   dedup, cycle detection and branch-local error recovery.
//! * [`translate`] – path translation between any node's namespace and
//!   the root namespace, in both directions.
//! * [`cache`] – the memoizing, single-flight prim index cache with
//!   explicit per-layer invalidation.
//! * [`engine`] – the consumer-facing API tying the pieces together.
//! * [`interface`] – background-thread builds with cooperative
//!   cancellation.
//! * [`settings`] – engine settings, loadable from `laminate.toml`.
//! * [`diagnostic`] – text and JSON dumps of composed indexes.
//!
//! ## Errors
//! Branch-local problems (unresolvable targets, cycles, conflicting
//! offsets, permission violations, depth overruns) never abort a build:
//! they are recorded on the index's error list next to a best-effort
//! result. Only cancellation, configuration mistakes and a failure to
//! resolve the *root* layer surface as `Err`.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use laminate::engine::Engine;
//! use laminate::layer::{InMemoryLayer, InMemoryResolver, LayerOffset};
//! use laminate::path::prim_path;
//! use laminate::settings::Settings;
//!
//! let foo = prim_path("/Foo").unwrap();
//! let bar = prim_path("/Bar").unwrap();
//!
//! let mut other = InMemoryLayer::new("other.layer");
//! other.set_field(&bar, "color", "green");
//! let mut root = InMemoryLayer::new("root.layer");
//! root.set_field(&foo, "color", "blue");
//! root.add_reference(&foo, Some("other.layer"), &bar, LayerOffset::IDENTITY);
//!
//! let mut resolver = InMemoryResolver::new();
//! resolver.insert(other.into_layer());
//!
//! let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();
//! let index = engine.compute_prim_index(&foo, &Default::default()).unwrap();
//! let order: Vec<_> = index
//!     .entries()
//!     .iter()
//!     .map(|e| (e.layer.identifier().to_owned(), e.path.to_string()))
//!     .collect();
//! assert_eq!(
//!     order,
//!     vec![
//!         ("root.layer".to_owned(), "/Foo".to_owned()),
//!         ("other.layer".to_owned(), "/Bar".to_owned()),
//!     ]
//! );
//! assert_eq!(index.resolve_field("color").unwrap().0, "blue");
//! ```
//!
//! ## Concurrency
//! Builds for independent paths run fully in parallel; the cache is the
//! only shared mutable structure. Concurrent requests for the same
//! (path, selections) key share a single build via an in-flight marker,
//! and the classifier/flattener never depend on thread timing, so equal
//! requests always produce identical ordered output.

pub mod arc;
pub mod cache;
pub mod diagnostic;
pub mod engine;
pub mod error;
pub mod graph;
pub mod interface;
pub mod layer;
pub mod path;
pub mod settings;
pub mod strength;
pub mod translate;
