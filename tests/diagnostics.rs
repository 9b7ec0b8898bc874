use std::sync::Arc;

use laminate::diagnostic::{dump_json, dump_text};
use laminate::engine::Engine;
use laminate::layer::{InMemoryLayer, InMemoryResolver, LayerOffset};
use laminate::path::prim_path;
use laminate::settings::Settings;

fn setup() -> Engine {
    let foo = prim_path("/Foo").unwrap();
    let bar = prim_path("/Bar").unwrap();
    let mut other = InMemoryLayer::new("other.layer");
    other.set_field(&bar, "color", "green");
    let mut root = InMemoryLayer::new("root.layer");
    root.set_field(&foo, "color", "blue");
    root.add_reference(&foo, Some("other.layer"), &bar, LayerOffset::IDENTITY);
    let mut resolver = InMemoryResolver::new();
    resolver.insert(other.into_layer());
    Engine::new(root.into_layer(), Arc::new(resolver), Settings::default()).unwrap()
}

#[test]
fn text_dump_names_every_node_and_the_order() {
    let engine = setup();
    let index = engine
        .compute_prim_index(&prim_path("/Foo").unwrap(), &Default::default())
        .unwrap();
    let text = dump_text(&index);

    assert!(text.contains("PrimIndex /Foo"));
    assert!(text.contains("[root] <root.layer>/Foo"));
    assert!(text.contains("[reference] <other.layer>/Bar"));
    assert!(text.contains("order:"));
    assert!(text.contains("(root.layer, /Foo)"));
    assert!(text.contains("(other.layer, /Bar)"));
}

#[test]
fn text_dump_marks_abandoned_branches() {
    let a = prim_path("/A").unwrap();
    let mut root = InMemoryLayer::new("loop.layer");
    root.set_field(&a, "color", "red");
    root.add_reference(&a, None, &a, LayerOffset::IDENTITY);
    let engine = Engine::new(
        root.into_layer(),
        Arc::new(InMemoryResolver::new()),
        Settings::default(),
    )
    .unwrap();

    let index = engine.compute_prim_index(&a, &Default::default()).unwrap();
    let text = dump_text(&index);
    assert!(text.contains("(cycle)"), "cycle branches are labelled:\n{text}");
    assert!(text.contains("errors:"), "the error list is rendered:\n{text}");
}

#[test]
fn json_dump_is_machine_readable() {
    let engine = setup();
    let index = engine
        .compute_prim_index(&prim_path("/Foo").unwrap(), &Default::default())
        .unwrap();
    let value = dump_json(&index);

    assert_eq!(value["path"], "/Foo");
    assert_eq!(value["graph"]["arc"], "root");
    assert_eq!(value["graph"]["children"][0]["arc"], "reference");
    assert_eq!(value["order"].as_array().unwrap().len(), index.entries().len());
    assert!(value["dependencies"]
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d == "other.layer"));

    // survives a serialization round trip untouched
    let text = serde_json::to_string(&value).unwrap();
    let back: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(back, value);
}
