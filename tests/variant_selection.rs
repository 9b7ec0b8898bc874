use std::collections::BTreeMap;
use std::sync::Arc;

use laminate::engine::Engine;
use laminate::layer::{InMemoryLayer, InMemoryResolver};
use laminate::path::prim_path;
use laminate::settings::Settings;

/// /Rig carries a `lod` variant set with differing opinions per variant.
fn setup(authored_selection: Option<&str>) -> Engine {
    let rig = prim_path("/Rig").unwrap();
    let mut root = InMemoryLayer::new("rig.layer");
    root.set_field(&rig, "kind", "rig");
    root.add_variant_set(&rig, "lod", &["high", "low"]);
    root.set_field(&rig.with_variant("lod", "high"), "detail", "fine");
    root.set_field(&rig.with_variant("lod", "low"), "detail", "coarse");
    if let Some(selection) = authored_selection {
        root.select_variant(&rig, "lod", selection);
    }
    let resolver = InMemoryResolver::new();
    Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap()
}

fn selections(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn first_authored_variant_is_the_fallback() {
    let engine = setup(None);
    let index = engine
        .compute_prim_index(&prim_path("/Rig").unwrap(), &Default::default())
        .unwrap();
    assert_eq!(index.resolve_field("detail").unwrap().0, "fine");
}

#[test]
fn authored_selection_beats_the_fallback() {
    let engine = setup(Some("low"));
    let index = engine
        .compute_prim_index(&prim_path("/Rig").unwrap(), &Default::default())
        .unwrap();
    assert_eq!(index.resolve_field("detail").unwrap().0, "coarse");
}

#[test]
fn caller_selection_beats_the_authored_one() {
    let engine = setup(Some("low"));
    let index = engine
        .compute_prim_index(&prim_path("/Rig").unwrap(), &selections(&[("lod", "high")]))
        .unwrap();
    assert_eq!(index.resolve_field("detail").unwrap().0, "fine");
}

#[test]
fn variant_entries_sit_below_local_opinions() {
    let engine = setup(Some("low"));
    let index = engine
        .compute_prim_index(&prim_path("/Rig").unwrap(), &Default::default())
        .unwrap();
    let paths: Vec<_> = index.entries().iter().map(|e| e.path.to_string()).collect();
    assert_eq!(paths, vec!["/Rig", "/Rig{lod=low}"]);
}

#[test]
fn cache_keys_distinguish_selections() {
    let engine = setup(None);
    let rig = prim_path("/Rig").unwrap();
    let high = engine
        .compute_prim_index(&rig, &selections(&[("lod", "high")]))
        .unwrap();
    let count_after_high = engine.cache().build_count();
    let low = engine
        .compute_prim_index(&rig, &selections(&[("lod", "low")]))
        .unwrap();
    assert!(
        engine.cache().build_count() > count_after_high,
        "a different selection is a different key and must build"
    );
    assert_ne!(
        high.resolve_field("detail").unwrap().0,
        low.resolve_field("detail").unwrap().0
    );

    // repeating either selection is a hit
    let before = engine.cache().build_count();
    let high_again = engine
        .compute_prim_index(&rig, &selections(&[("lod", "high")]))
        .unwrap();
    assert_eq!(engine.cache().build_count(), before);
    assert!(Arc::ptr_eq(&high, &high_again));
}

#[test]
fn variants_inside_variants_compose() {
    let rig = prim_path("/Rig").unwrap();
    let mut root = InMemoryLayer::new("rig.layer");
    root.set_field(&rig, "kind", "rig");
    root.add_variant_set(&rig, "lod", &["high"]);
    let high = rig.with_variant("lod", "high");
    root.set_field(&high, "detail", "fine");
    root.add_variant_set(&high, "shading", &["full"]);
    root.set_field(&high.with_variant("shading", "full"), "mode", "pbr");
    let resolver = InMemoryResolver::new();
    let engine = Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap();

    let index = engine.compute_prim_index(&rig, &Default::default()).unwrap();
    assert_eq!(index.resolve_field("mode").unwrap().0, "pbr");
    let paths: Vec<_> = index.entries().iter().map(|e| e.path.to_string()).collect();
    assert_eq!(
        paths,
        vec!["/Rig", "/Rig{lod=high}", "/Rig{lod=high}{shading=full}"]
    );
}
