use std::sync::Arc;

use laminate::arc::ArcType;
use laminate::engine::Engine;
use laminate::graph::{NodeId, PrimIndex};
use laminate::layer::{InMemoryLayer, InMemoryResolver, LayerOffset};
use laminate::path::prim_path;
use laminate::settings::Settings;

fn node_of_type(index: &PrimIndex, arc_type: ArcType) -> NodeId {
    index
        .graph()
        .nodes()
        .find(|(_, n)| n.arc_type == arc_type)
        .map(|(id, _)| id)
        .unwrap_or_else(|| panic!("no {} node in graph", arc_type.label()))
}

#[test]
fn reference_paths_round_trip() {
    let foo = prim_path("/Foo").unwrap();
    let bar = prim_path("/Bar").unwrap();

    let mut other = InMemoryLayer::new("other.layer");
    other.set_field(&bar, "color", "green");
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&foo, "color", "blue");
    root.add_reference(&foo, Some("other.layer"), &bar, LayerOffset::IDENTITY);
    let mut resolver = InMemoryResolver::new();
    resolver.insert(other.into_layer());
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let index = engine.compute_prim_index(&foo, &Default::default()).unwrap();
    let reference = node_of_type(&index, ArcType::Reference);

    let inner = prim_path("/Bar/Mesh/Points").unwrap();
    let at_root = index
        .translate_path_to_root(reference, &inner)
        .expect("path under the referenced subtree translates");
    assert_eq!(at_root.to_string(), "/Foo/Mesh/Points");

    let back = index
        .translate_path_from_root(reference, &at_root)
        .expect("round trip back into the node namespace");
    assert_eq!(back, inner);

    // a path outside the referenced subtree is local-only
    assert_eq!(
        index.translate_path_to_root(reference, &prim_path("/Elsewhere").unwrap()),
        None
    );
}

#[test]
fn variant_paths_round_trip_and_targets_drop_selections() {
    let foo = prim_path("/Foo").unwrap();

    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&foo, "color", "blue");
    root.add_variant_set(&foo, "lod", &["high", "low"]);
    root.set_field(&foo.with_variant("lod", "high"), "detail", "fine");
    let resolver = InMemoryResolver::new();
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let index = engine.compute_prim_index(&foo, &Default::default()).unwrap();
    let variant = node_of_type(&index, ArcType::Variant);

    let inner = prim_path("/Foo{lod=high}/Mesh").unwrap();
    let at_root = index
        .translate_path_to_root(variant, &inner)
        .expect("variant paths translate");
    assert_eq!(at_root.to_string(), "/Foo/Mesh", "selections vanish toward the root");

    let back = index
        .translate_path_from_root(variant, &at_root)
        .expect("round trip restores the selection");
    assert_eq!(back, inner);

    // target translation strips selections no matter where they appear
    let root_node = index.graph().root();
    let target = index
        .translate_target_path_to_root(root_node, &inner)
        .expect("identity hop");
    assert_eq!(target.to_string(), "/Foo/Mesh");
}

#[test]
fn relocated_paths_round_trip() {
    let old = prim_path("/Old").unwrap();
    let new = prim_path("/New").unwrap();

    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&old, "color", "aged");
    root.set_field(&new, "marker", "present");
    root.relocate(&old, &new);
    let resolver = InMemoryResolver::new();
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let index = engine.compute_prim_index(&new, &Default::default()).unwrap();
    let relocate = node_of_type(&index, ArcType::Relocate);

    let inner = prim_path("/Old/Part").unwrap();
    let at_root = index
        .translate_path_to_root(relocate, &inner)
        .expect("relocated paths translate");
    assert_eq!(at_root.to_string(), "/New/Part");

    let back = index
        .translate_path_from_root(relocate, &at_root)
        .expect("round trip back under the old name");
    assert_eq!(back, inner);
}

#[test]
fn chained_arcs_compose_their_translations() {
    // /Foo references mid:/Mid, which references leaf:/Leaf
    let foo = prim_path("/Foo").unwrap();
    let mid = prim_path("/Mid").unwrap();
    let leaf = prim_path("/Leaf").unwrap();

    let mut leaf_layer = InMemoryLayer::new("leaf.layer");
    leaf_layer.set_field(&leaf, "color", "green");
    let mut mid_layer = InMemoryLayer::new("mid.layer");
    mid_layer.set_field(&mid, "color", "teal");
    mid_layer.add_reference(&mid, Some("leaf.layer"), &leaf, LayerOffset::IDENTITY);
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&foo, "color", "blue");
    root.add_reference(&foo, Some("mid.layer"), &mid, LayerOffset::IDENTITY);

    let mut resolver = InMemoryResolver::new();
    resolver.insert(leaf_layer.into_layer()).insert(mid_layer.into_layer());
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let index = engine.compute_prim_index(&foo, &Default::default()).unwrap();
    let leaf_node = index
        .graph()
        .nodes()
        .find(|(_, n)| n.site.path == leaf)
        .map(|(id, _)| id)
        .expect("leaf node present");

    let inner = prim_path("/Leaf/Deep").unwrap();
    let at_root = index.translate_path_to_root(leaf_node, &inner).unwrap();
    assert_eq!(at_root.to_string(), "/Foo/Deep");
    let back = index.translate_path_from_root(leaf_node, &at_root).unwrap();
    assert_eq!(back, inner);
}
