//! End-to-end: scan a library on disk, load assets through the graph, and
//! follow references across files.

use dson_api_core::{AssetId, Reference};
use dson_asset_core::{resolve, AssetGraph, LibraryIndex, ResolutionContext, Target};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn library() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "data/people/base.dsf",
        r#"{
            "asset_info": {"id": "/data/people/base.dsf", "type": "figure"},
            "node_library": [
                {"id": "arm", "type": "bone", "channels": [
                    {"id": "twist", "type": "float", "value": 0.0}
                ]}
            ]
        }"#,
    );
    write_file(
        dir.path(),
        "data/people/hero.duf",
        r##"{
            "asset_info": {"id": "/data/people/hero.duf", "type": "figure"},
            "source": "/data/people/base.dsf",
            "modifier_library": [
                {"id": "ArmTwist",
                 "channel": {"id": "value", "type": "float", "value": 0.0},
                 "formulas": [{"output": "base.dsf#arm?twist", "operations": [
                    {"op": "push", "url": "#ArmTwist?value"}
                 ]}]}
            ]
        }"##,
    );
    dir
}

#[test]
fn scan_load_and_follow_references() {
    let dir = library();
    let (index, issues) = LibraryIndex::scan(vec![dir.path().to_path_buf()]);
    assert!(issues.is_empty());
    assert_eq!(index.len(), 2);

    let mut graph = AssetGraph::new(index);
    let hero = graph.load_path("/data/people/hero.duf").unwrap();
    // Inherited through the source reference.
    assert!(hero.node("arm").unwrap().inherited);
    drop(hero);

    // A file-relative reference resolves against the referencing asset's
    // own location.
    let ctx = ResolutionContext::new(AssetId::from_path("/data/people/hero.duf"));
    let target = resolve(
        &mut graph,
        &Reference::parse("base.dsf#arm?twist").unwrap(),
        &ctx,
    )
    .unwrap();
    assert_eq!(
        target,
        Target::Channel(dson_api_core::ChannelKey::new(
            AssetId::from_path("/data/people/base.dsf"),
            "arm",
            "twist",
        ))
    );
}

#[test]
fn same_document_resolution_never_consults_the_index() {
    // An empty index: any lookup would fail with NotFound. Same-document
    // fragments must still resolve against the already-loaded asset.
    let mut graph = AssetGraph::default();
    let asset = graph
        .install_document(
            dson_asset_core::Document::parse(
                br#"{
                    "asset_info": {"id": "/data/loose.duf", "type": "figure"},
                    "node_library": [{"id": "hip", "type": "bone"}]
                }"#,
            )
            .unwrap(),
        )
        .unwrap();
    let ctx = ResolutionContext::new(asset.id.clone());
    drop(asset);

    let target = resolve(&mut graph, &Reference::parse("#hip").unwrap(), &ctx).unwrap();
    assert_eq!(
        target,
        Target::Node {
            asset: AssetId::from_path("/data/loose.duf"),
            node: "hip".into(),
        }
    );
}

#[test]
fn resolution_is_deterministic() {
    let dir = library();
    let (index, _) = LibraryIndex::scan(vec![dir.path().to_path_buf()]);
    let mut graph = AssetGraph::new(index);

    let ctx = ResolutionContext::new(AssetId::from_path("/data/people/hero.duf"));
    let reference = Reference::parse("base.dsf#arm?twist").unwrap();
    let first = resolve(&mut graph, &reference, &ctx).unwrap();
    let second = resolve(&mut graph, &reference, &ctx).unwrap();
    assert_eq!(first, second);
}

