use std::sync::Arc;

use laminate::engine::Engine;
use laminate::error::CompositionErrorKind;
use laminate::graph::NodeState;
use laminate::layer::{InMemoryLayer, InMemoryResolver, LayerOffset};
use laminate::path::prim_path;
use laminate::settings::Settings;

#[test]
fn sublayer_closure_composes_offsets() {
    let thing = prim_path("/Thing").unwrap();

    let mut deep = InMemoryLayer::new("deep.layer");
    deep.set_field(&thing, "source", "deep");
    let mut middle = InMemoryLayer::new("middle.layer");
    middle.set_field(&thing, "source", "middle");
    middle.add_sublayer("deep.layer", LayerOffset::new(5.0, 2.0));
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&thing, "source", "root");
    root.add_sublayer("middle.layer", LayerOffset::new(10.0, 1.0));

    let mut resolver = InMemoryResolver::new();
    resolver.insert(deep.into_layer()).insert(middle.into_layer());
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let identifiers: Vec<_> = engine
        .root_stack()
        .layers()
        .iter()
        .map(|(l, _)| l.identifier().to_owned())
        .collect();
    assert_eq!(identifiers, vec!["root.layer", "middle.layer", "deep.layer"]);

    let index = engine.compute_prim_index(&thing, &Default::default()).unwrap();
    let deep_entry = index
        .entries()
        .iter()
        .find(|e| e.layer.identifier() == "deep.layer")
        .expect("deep layer contributes");
    // middle is mounted at +10, deep at middle's +5 with scale 2
    assert!((deep_entry.offset.offset - 15.0).abs() < 1e-9);
    assert!((deep_entry.offset.scale - 2.0).abs() < 1e-9);

    assert_eq!(index.resolve_field("source").unwrap().0, "root");
}

#[test]
fn sublayer_cycles_are_reported_and_survivable() {
    let thing = prim_path("/Thing").unwrap();
    let mut a = InMemoryLayer::new("a.layer");
    a.set_field(&thing, "from", "a");
    a.add_sublayer("b.layer", LayerOffset::IDENTITY);
    let mut b = InMemoryLayer::new("b.layer");
    b.set_field(&thing, "from", "b");
    b.add_sublayer("a.layer", LayerOffset::IDENTITY);

    let mut resolver = InMemoryResolver::new();
    let a = a.into_layer();
    resolver.insert(Arc::clone(&a)).insert(b.into_layer());
    let engine = Engine::new(a, Arc::new(resolver), Settings::default()).unwrap();

    assert_eq!(engine.root_stack().layers().len(), 2, "each layer appears once");
    let index = engine.compute_prim_index(&thing, &Default::default()).unwrap();
    assert_eq!(index.entries().len(), 2);
    assert!(
        index
            .errors()
            .iter()
            .any(|e| e.kind == CompositionErrorKind::Cycle),
        "the sublayer cycle must be surfaced: {:?}",
        index.errors()
    );
}

#[test]
fn unresolvable_sublayers_are_reported() {
    let thing = prim_path("/Thing").unwrap();
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&thing, "from", "root");
    root.add_sublayer("gone.layer", LayerOffset::IDENTITY);

    let resolver = InMemoryResolver::new();
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    assert_eq!(engine.root_stack().layers().len(), 1);
    let index = engine.compute_prim_index(&thing, &Default::default()).unwrap();
    assert!(
        index
            .errors()
            .iter()
            .any(|e| matches!(e.kind, CompositionErrorKind::ArcResolution { .. })),
        "missing sublayer must be surfaced: {:?}",
        index.errors()
    );
}

#[test]
fn session_layer_composes_strongest() {
    let thing = prim_path("/Thing").unwrap();
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&thing, "color", "authored");
    let mut session = InMemoryLayer::new("session.layer");
    session.set_field(&thing, "color", "session-override");

    let resolver = InMemoryResolver::new();
    let engine = Engine::with_session(
        root.into_layer(),
        session.into_layer(),
        Arc::new(resolver),
        Settings::default(),
    )
    .unwrap();

    let index = engine.compute_prim_index(&thing, &Default::default()).unwrap();
    assert_eq!(index.resolve_field("color").unwrap().0, "session-override");
}

fn payload_engine(settings: Settings) -> Engine {
    let model = prim_path("/Model").unwrap();
    let heavy = prim_path("/Heavy").unwrap();
    let mut payload = InMemoryLayer::new("payload.layer");
    payload.set_field(&heavy, "mesh", "millions-of-points");
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&model, "kind", "model");
    root.add_payload(&model, Some("payload.layer"), &heavy, LayerOffset::IDENTITY);
    let mut resolver = InMemoryResolver::new();
    resolver.insert(payload.into_layer());
    Engine::new(root.into_layer(), Arc::new(resolver), settings).unwrap()
}

#[test]
fn loaded_payloads_contribute_opinions() {
    let engine = payload_engine(Settings::default());
    let index = engine
        .compute_prim_index(&prim_path("/Model").unwrap(), &Default::default())
        .unwrap();
    assert_eq!(index.resolve_field("mesh").unwrap().0, "millions-of-points");
}

#[test]
fn unloaded_payloads_are_present_but_silent() {
    let mut settings = Settings::default();
    settings.include_payloads = false;
    let engine = payload_engine(settings);
    let index = engine
        .compute_prim_index(&prim_path("/Model").unwrap(), &Default::default())
        .unwrap();

    assert!(index.resolve_field("mesh").is_none(), "unloaded payloads carry no opinions");
    assert!(
        index
            .graph()
            .nodes()
            .any(|(_, n)| n.state == NodeState::Unloaded),
        "the payload node stays visible for inspection"
    );
    // the payload layer still counts as a dependency for invalidation
    assert!(index.dependencies().any(|d| d == "payload.layer"));
}

#[test]
fn references_to_private_sites_are_denied() {
    let asset = prim_path("/Asset").unwrap();
    let hidden = prim_path("/Hidden").unwrap();
    let mut guarded = InMemoryLayer::new("guarded.layer");
    guarded.set_field(&hidden, "permission", "private");
    guarded.set_field(&hidden, "secret", "yes");
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&asset, "kind", "asset");
    root.add_reference(&asset, Some("guarded.layer"), &hidden, LayerOffset::IDENTITY);
    let mut resolver = InMemoryResolver::new();
    resolver.insert(guarded.into_layer());
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let index = engine.compute_prim_index(&asset, &Default::default()).unwrap();
    assert!(index.resolve_field("secret").is_none());
    assert!(
        index
            .errors()
            .iter()
            .any(|e| e.kind == CompositionErrorKind::PermissionDenied),
        "expected a permission error, got {:?}",
        index.errors()
    );
}

#[test]
fn malformed_references_do_not_abort_the_scan() {
    let item = prim_path("/Item").unwrap();
    let good = prim_path("/Good").unwrap();
    let mut ok = InMemoryLayer::new("ok.layer");
    ok.set_field(&good, "value", "present");
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&item, "kind", "item");
    // empty identifier: unusable, reported, skipped
    root.add_reference(&item, Some(""), &good, LayerOffset::IDENTITY);
    root.add_reference(&item, Some("ok.layer"), &good, LayerOffset::IDENTITY);
    let mut resolver = InMemoryResolver::new();
    resolver.insert(ok.into_layer());
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let index = engine.compute_prim_index(&item, &Default::default()).unwrap();
    assert_eq!(index.resolve_field("value").unwrap().0, "present");
    assert!(
        index
            .errors()
            .iter()
            .any(|e| matches!(e.kind, CompositionErrorKind::MalformedArc { .. })),
        "expected a malformed-arc error, got {:?}",
        index.errors()
    );
}

#[test]
fn unresolvable_references_leave_siblings_intact() {
    let item = prim_path("/Item").unwrap();
    let good = prim_path("/Good").unwrap();
    let mut ok = InMemoryLayer::new("ok.layer");
    ok.set_field(&good, "value", "present");
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&item, "kind", "item");
    root.add_reference(&item, Some("lost.layer"), &good, LayerOffset::IDENTITY);
    root.add_reference(&item, Some("ok.layer"), &good, LayerOffset::IDENTITY);
    let mut resolver = InMemoryResolver::new();
    resolver.insert(ok.into_layer());
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let index = engine.compute_prim_index(&item, &Default::default()).unwrap();
    assert_eq!(index.resolve_field("value").unwrap().0, "present");
    assert!(
        index
            .errors()
            .iter()
            .any(|e| matches!(e.kind, CompositionErrorKind::ArcResolution { .. }))
    );
}
