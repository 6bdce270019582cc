//! Static/dynamic modifier classification.
//!
//! A dynamic modifier stays live in the formula network; a static one is
//! evaluated once and baked. Re-deriving skeleton shape (bone lengths,
//! scales, joint centers) at evaluation time is not supported, so a modifier
//! whose formulas feed those channels is classified static. The heuristic is
//! a default only; a caller-provided override is honored as-is.

use dson_asset_core::document::NodeKind;
use dson_asset_core::{resolve, AssetGraph, ResolutionContext, Target};
use dson_api_core::{AssetId, ChannelKey, DsonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Evaluated once and baked into the result.
    Static,
    /// Kept live in the formula network.
    Dynamic,
}

/// Channel paths on a bone that change skeleton shape rather than pose.
const SKELETON_CHANNELS: &[&str] = &[
    "scale",
    "general_scale",
    "translation",
    "orientation",
    "center_point",
    "end_point",
];

/// Classify one modifier of a loaded asset. `override_with`, when given,
/// wins outright.
pub fn classify(
    graph: &mut AssetGraph,
    asset_id: &AssetId,
    modifier_id: &str,
    override_with: Option<Classification>,
) -> Result<Classification, DsonError> {
    if let Some(explicit) = override_with {
        return Ok(explicit);
    }

    let asset = graph.load(asset_id)?;
    let modifier = asset
        .modifier(modifier_id)
        .ok_or_else(|| DsonError::NotFound {
            id: format!("{asset_id}#{modifier_id}"),
        })?;

    let presentation = modifier.presentation_kind.clone();
    let visible = modifier.channel.visible;
    let has_formulas = !modifier.formulas.is_empty();
    let outputs: Vec<dson_api_core::Reference> =
        modifier.formulas.iter().map(|f| f.output.clone()).collect();
    drop(asset);

    // Any skeleton-affecting output forces a bake.
    let ctx = ResolutionContext::new(asset_id.clone());
    for output in &outputs {
        let target = match resolve(graph, output, &ctx) {
            Ok(t) => t,
            // An unresolvable output contributes nothing either way.
            Err(_) => continue,
        };
        if let Target::Channel(key) = target {
            if affects_skeleton(graph, &key) {
                return Ok(Classification::Static);
            }
        }
    }

    // Pose-driven correctives are the dynamic case this engine exists for.
    if presentation.starts_with("Modifier/Corrective")
        || presentation.starts_with("Modifier/Pose")
    {
        return Ok(Classification::Dynamic);
    }

    // A hidden dial with no formulas has nothing to stay live for.
    if !visible && !has_formulas {
        return Ok(Classification::Static);
    }

    Ok(Classification::Dynamic)
}

fn affects_skeleton(graph: &AssetGraph, key: &ChannelKey) -> bool {
    let Some(asset) = graph.loaded(&key.asset) else {
        return false;
    };
    let Some(node) = asset.node(&key.node) else {
        return false;
    };
    if node.kind != NodeKind::Bone {
        return false;
    }
    let first = key.channel.split('/').next().unwrap_or(&key.channel);
    SKELETON_CHANNELS.contains(&first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dson_asset_core::document::Document;

    fn graph_with(json: &str) -> (AssetGraph, AssetId) {
        let mut graph = AssetGraph::default();
        let id = graph
            .install_document(Document::parse(json.as_bytes()).unwrap())
            .unwrap()
            .id
            .clone();
        (graph, id)
    }

    const FIXTURE: &str = r##"{
        "asset_info": {"id": "/data/cls.dsf", "type": "figure"},
        "node_library": [
            {"id": "shin", "type": "bone", "channels": [
                {"id": "scale/x", "type": "float", "value": 1.0},
                {"id": "rotation/x", "type": "float", "value": 0.0}
            ]}
        ],
        "modifier_library": [
            {"id": "LegLength",
             "channel": {"id": "value", "type": "float", "value": 0.0},
             "formulas": [{"output": "#shin?scale/x", "operations": [
                {"op": "push", "url": "#LegLength?value"}
             ]}]},
            {"id": "KneeCorrective",
             "presentation": {"type": "Modifier/Corrective"},
             "channel": {"id": "value", "type": "float", "value": 0.0},
             "formulas": [{"output": "#KneeCorrective?value", "operations": [
                {"op": "push", "url": "#shin?rotation/x"}
             ]}]},
            {"id": "HiddenDial",
             "channel": {"id": "value", "type": "float", "value": 0.0,
                         "visible": false}}
        ]
    }"##;

    #[test]
    fn skeleton_scaling_modifier_is_static() {
        let (mut graph, id) = graph_with(FIXTURE);
        let class = classify(&mut graph, &id, "LegLength", None).unwrap();
        assert_eq!(class, Classification::Static);
    }

    #[test]
    fn pose_corrective_is_dynamic() {
        let (mut graph, id) = graph_with(FIXTURE);
        let class = classify(&mut graph, &id, "KneeCorrective", None).unwrap();
        assert_eq!(class, Classification::Dynamic);
    }

    #[test]
    fn hidden_formula_less_dial_is_static() {
        let (mut graph, id) = graph_with(FIXTURE);
        let class = classify(&mut graph, &id, "HiddenDial", None).unwrap();
        assert_eq!(class, Classification::Static);
    }

    #[test]
    fn explicit_override_wins() {
        let (mut graph, id) = graph_with(FIXTURE);
        let class = classify(&mut graph, &id, "LegLength", Some(Classification::Dynamic)).unwrap();
        assert_eq!(class, Classification::Dynamic);
    }

    #[test]
    fn unknown_modifier_is_not_found() {
        let (mut graph, id) = graph_with(FIXTURE);
        assert!(matches!(
            classify(&mut graph, &id, "Nope", None),
            Err(DsonError::NotFound { .. })
        ));
    }
}
