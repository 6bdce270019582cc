//! Context-dependent reference resolution.
//!
//! The same raw string can mean different targets in different contexts, so
//! resolution always takes a [`ResolutionContext`] and results are never
//! cached keyed on the raw string. Resolution order:
//!
//! 1. no scheme and no path: the fragment names a node inside the *same*
//!    asset as the context (the index is never consulted);
//! 2. a relative path resolves against the context asset's own location,
//!    then through the index by the resulting canonical id;
//! 3. an absolute path is a library id, looked up in the index directly.
//!
//! A scheme, when present, disambiguates which subtree the fragment must
//! live under (two files can publish the same fragment id). A fragment
//! always yields a node or channel target, never the file itself.

use crate::graph::{Asset, AssetGraph};
use dson_api_core::{AssetId, ChannelKey, DsonError, Reference};
use std::sync::Arc;

/// Maximum alias forwarding depth. Aliases in real data are one hop; the
/// guard turns a malformed alias loop into a `Resolve` error.
const MAX_ALIAS_DEPTH: u32 = 8;

/// The asset currently being processed, for same-document and relative
/// resolution.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub asset: AssetId,
}

impl ResolutionContext {
    pub fn new(asset: AssetId) -> Self {
        ResolutionContext { asset }
    }
}

/// A concrete resolution result: a node, or a channel on a node/modifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Node { asset: AssetId, node: String },
    Channel(ChannelKey),
}

impl Target {
    pub fn asset(&self) -> &AssetId {
        match self {
            Target::Node { asset, .. } => asset,
            Target::Channel(key) => &key.asset,
        }
    }

    pub fn channel_key(&self) -> Option<&ChannelKey> {
        match self {
            Target::Channel(key) => Some(key),
            Target::Node { .. } => None,
        }
    }
}

/// Resolve `reference` against `ctx`, loading files on demand.
pub fn resolve(
    graph: &mut AssetGraph,
    reference: &Reference,
    ctx: &ResolutionContext,
) -> Result<Target, DsonError> {
    resolve_inner(graph, reference, ctx, 0)
}

fn resolve_inner(
    graph: &mut AssetGraph,
    reference: &Reference,
    ctx: &ResolutionContext,
    depth: u32,
) -> Result<Target, DsonError> {
    if depth > MAX_ALIAS_DEPTH {
        return Err(DsonError::Resolve {
            reference: reference.to_string(),
            reason: "alias forwarding too deep (loop?)".to_string(),
        });
    }
    if !reference.has_fragment() {
        // Documents never reference a file as a whole; they always name
        // something inside it. Source inheritance is handled by the loader.
        return Err(DsonError::Resolve {
            reference: reference.to_string(),
            reason: "reference points to a file, not a resource".to_string(),
        });
    }

    let asset = containing_asset(graph, reference, ctx)?;
    let fragment = reference.fragment();

    if reference.has_scheme() {
        // The scheme names the subtree the fragment must live under.
        let under = reference.scheme();
        if !is_under(&asset, &fragment, &under) {
            return Err(DsonError::Resolve {
                reference: reference.to_string(),
                reason: format!("{fragment} not found under {under}"),
            });
        }
    }

    let target = locate_fragment(&asset, reference, &fragment)?;

    // Alias channels forward to their target channel.
    if let Target::Channel(key) = &target {
        if let Some(alias) = alias_target(&asset, key) {
            let alias_ctx = ResolutionContext::new(asset.id.clone());
            return resolve_inner(graph, &alias, &alias_ctx, depth + 1);
        }
    }
    Ok(target)
}

/// Find the asset the reference addresses, per the resolution ordering.
fn containing_asset(
    graph: &mut AssetGraph,
    reference: &Reference,
    ctx: &ResolutionContext,
) -> Result<Arc<Asset>, DsonError> {
    if !reference.has_path() {
        // Same-document: only the already-loaded context asset is eligible;
        // the library index is never consulted. A context asset is loaded
        // before anything inside it resolves, so a miss here is a caller bug.
        return match graph.loaded(&ctx.asset) {
            Some(asset) => Ok(Arc::clone(asset)),
            None => Err(DsonError::Resolve {
                reference: reference.to_string(),
                reason: format!("context asset {} is not loaded", ctx.asset),
            }),
        };
    }

    let path = reference.path();
    let id = if reference.is_absolute() {
        AssetId::from_path(&path)
    } else {
        // Relative to the context asset's own declared location.
        let base = match graph.loaded(&ctx.asset) {
            Some(asset) => asset.declared_path.clone(),
            None => graph.load(&ctx.asset)?.declared_path.clone(),
        };
        AssetId::from_path(&join_relative(&base, &path))
    };
    graph.load(&id)
}

/// Join a relative path onto the directory of `base`, folding `.` and `..`.
fn join_relative(base: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = base.split('/').collect();
    segments.pop(); // drop the file name
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn locate_fragment(
    asset: &Asset,
    reference: &Reference,
    fragment: &str,
) -> Result<Target, DsonError> {
    let query = reference.query();

    if let Some(node) = asset.node(fragment) {
        if !reference.has_query() {
            return Ok(Target::Node {
                asset: asset.id.clone(),
                node: node.id.clone(),
            });
        }
        if node.channels.contains_key(&query) {
            return Ok(Target::Channel(ChannelKey::new(
                asset.id.clone(),
                fragment,
                query,
            )));
        }
        return Err(DsonError::Resolve {
            reference: reference.to_string(),
            reason: format!("node {fragment} has no channel {query}"),
        });
    }

    if let Some(modifier) = asset.modifier(fragment) {
        if !reference.has_query() {
            return Ok(Target::Node {
                asset: asset.id.clone(),
                node: modifier.id.clone(),
            });
        }
        if modifier.channel.id == query || query == "value" {
            return Ok(Target::Channel(ChannelKey::new(
                asset.id.clone(),
                fragment,
                modifier.channel.id.clone(),
            )));
        }
        return Err(DsonError::Resolve {
            reference: reference.to_string(),
            reason: format!("modifier {fragment} has no channel {query}"),
        });
    }

    Err(DsonError::Resolve {
        reference: reference.to_string(),
        reason: format!("no node or modifier {fragment} in {}", asset.id),
    })
}

/// True if `fragment` sits under node `ancestor` in the asset's own
/// hierarchy (following in-document parent references only).
fn is_under(asset: &Asset, fragment: &str, ancestor: &str) -> bool {
    if fragment == ancestor {
        return true;
    }
    let mut current = parent_fragment(asset, fragment);
    let mut hops = 0;
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        hops += 1;
        if hops > 64 {
            break; // malformed parent loop
        }
        current = parent_fragment(asset, &id);
    }
    false
}

fn parent_fragment(asset: &Asset, id: &str) -> Option<String> {
    let parent = if let Some(node) = asset.node(id) {
        node.parent.as_ref()
    } else {
        asset.modifier(id).and_then(|m| m.parent.as_ref())
    }?;
    if parent.has_path() || !parent.has_fragment() {
        // Cross-asset parents end the in-document chain.
        return None;
    }
    Some(parent.fragment())
}

fn alias_target(asset: &Asset, key: &ChannelKey) -> Option<Reference> {
    let channel = asset.channel(&key.node, &key.channel)?;
    channel.alias_target.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn graph_with(docs: &[&str]) -> AssetGraph {
        let mut graph = AssetGraph::default();
        for json in docs {
            graph
                .install_document(Document::parse(json.as_bytes()).unwrap())
                .unwrap();
        }
        graph
    }

    const FIGURE: &str = r##"{
        "asset_info": {"id": "/data/figure.dsf", "type": "figure"},
        "node_library": [
            {"id": "chest", "type": "bone", "channels": [
                {"id": "rotation/x", "type": "float", "value": 0.0}
            ]},
            {"id": "lCollar", "type": "bone", "parent": "#chest", "channels": [
                {"id": "rotation/x", "type": "float", "value": 0.0}
            ]},
            {"id": "rCollar", "type": "bone", "parent": "#chest", "channels": [
                {"id": "rotation/x", "type": "float", "value": 0.0}
            ]}
        ],
        "modifier_library": [
            {"id": "CTRLTwist", "parent": "#rCollar",
             "channel": {"id": "value", "type": "float", "value": 0.0}},
            {"id": "AliasTwist", "parent": "#chest",
             "channel": {"id": "value", "type": "alias",
                         "target_channel": "#CTRLTwist?value"}}
        ]
    }"##;

    fn ctx() -> ResolutionContext {
        ResolutionContext::new(AssetId::from_path("/data/figure.dsf"))
    }

    #[test]
    fn same_document_fragment() {
        let mut graph = graph_with(&[FIGURE]);
        let target = resolve(
            &mut graph,
            &Reference::parse("#chest?rotation/x").unwrap(),
            &ctx(),
        )
        .unwrap();
        let key = target.channel_key().unwrap();
        assert_eq!(key.node, "chest");
        assert_eq!(key.channel, "rotation/x");
    }

    #[test]
    fn fragment_without_query_yields_node() {
        let mut graph = graph_with(&[FIGURE]);
        let target = resolve(&mut graph, &Reference::parse("#lCollar").unwrap(), &ctx()).unwrap();
        assert_eq!(
            target,
            Target::Node {
                asset: AssetId::from_path("/data/figure.dsf"),
                node: "lCollar".into()
            }
        );
    }

    #[test]
    fn scheme_restricts_subtree() {
        let mut graph = graph_with(&[FIGURE]);
        // CTRLTwist is parented under rCollar; the rCollar-qualified lookup
        // succeeds, the lCollar-qualified one fails.
        assert!(resolve(
            &mut graph,
            &Reference::parse("rCollar:#CTRLTwist?value").unwrap(),
            &ctx()
        )
        .is_ok());
        let err = resolve(
            &mut graph,
            &Reference::parse("lCollar:#CTRLTwist?value").unwrap(),
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, DsonError::Resolve { .. }));
    }

    #[test]
    fn alias_forwards_to_target_channel() {
        let mut graph = graph_with(&[FIGURE]);
        let target = resolve(
            &mut graph,
            &Reference::parse("#AliasTwist?value").unwrap(),
            &ctx(),
        )
        .unwrap();
        assert_eq!(target.channel_key().unwrap().node, "CTRLTwist");
    }

    #[test]
    fn alias_loop_errors_instead_of_recursing() {
        let looping = r##"{
            "asset_info": {"id": "/data/loop.dsf", "type": "modifier"},
            "modifier_library": [
                {"id": "A", "channel": {"id": "value", "type": "alias",
                                         "target_channel": "#B?value"}},
                {"id": "B", "channel": {"id": "value", "type": "alias",
                                         "target_channel": "#A?value"}}
            ]
        }"##;
        let mut graph = graph_with(&[looping]);
        let ctx = ResolutionContext::new(AssetId::from_path("/data/loop.dsf"));
        let err = resolve(&mut graph, &Reference::parse("#A?value").unwrap(), &ctx).unwrap_err();
        assert!(matches!(err, DsonError::Resolve { .. }));
    }

    #[test]
    fn missing_fragment_is_resolve_error() {
        let mut graph = graph_with(&[FIGURE]);
        let err = resolve(&mut graph, &Reference::parse("#nothere").unwrap(), &ctx()).unwrap_err();
        assert!(matches!(err, DsonError::Resolve { .. }));
    }

    #[test]
    fn same_document_with_unloaded_context_never_falls_back_to_the_index() {
        // An empty graph: nothing loaded, nothing indexed. A same-document
        // reference must fail fast rather than go looking in the library.
        let mut graph = AssetGraph::default();
        let err = resolve(&mut graph, &Reference::parse("#chest").unwrap(), &ctx()).unwrap_err();
        assert!(matches!(err, DsonError::Resolve { .. }));
    }

    #[test]
    fn file_only_reference_is_rejected() {
        let mut graph = graph_with(&[FIGURE]);
        let err = resolve(
            &mut graph,
            &Reference::parse("/data/figure.dsf").unwrap(),
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, DsonError::Resolve { .. }));
    }

    #[test]
    fn relative_paths_join_against_context_location() {
        assert_eq!(
            join_relative("/data/people/figure.dsf", "morphs/head.dsf"),
            "/data/people/morphs/head.dsf"
        );
        assert_eq!(
            join_relative("/data/people/figure.dsf", "../shared/base.dsf"),
            "/data/shared/base.dsf"
        );
    }

    #[test]
    fn same_raw_string_resolves_per_context() {
        let other = r#"{
            "asset_info": {"id": "/data/other.dsf", "type": "figure"},
            "node_library": [
                {"id": "chest", "type": "bone", "channels": [
                    {"id": "rotation/x", "type": "float", "value": 0.0}
                ]}
            ]
        }"#;
        let mut graph = graph_with(&[FIGURE, other]);
        let reference = Reference::parse("#chest?rotation/x").unwrap();
        let a = resolve(&mut graph, &reference, &ctx()).unwrap();
        let b = resolve(
            &mut graph,
            &reference,
            &ResolutionContext::new(AssetId::from_path("/data/other.dsf")),
        )
        .unwrap();
        assert_ne!(a, b);
        assert_eq!(a.channel_key().unwrap().node, "chest");
        assert_eq!(b.channel_key().unwrap().asset, AssetId::from_path("/data/other.dsf"));
    }
}
