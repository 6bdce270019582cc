//! In-memory asset graph and the id-keyed load cache.
//!
//! Assets are owned by exactly one cache slot and published only after being
//! fully constructed, so a partially-built asset is never visible. Cross-asset
//! references stay as parsed [`Reference`]s and are resolved on first use
//! (see [`crate::resolve`]); loading a file never forces its transitive
//! closure.

use crate::document::{
    read_document_bytes, ChannelKind, ChannelRecord, Document, FormulaRecord, ModifierRecord,
    NodeKind, NodeRecord,
};
use crate::index::LibraryIndex;
use dson_api_core::{AssetId, DsonError, Issue, IssueKind, IssueList, Reference, Value};
use hashbrown::HashMap;
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// A typed scalar value slot with default, bounds, and visibility.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub kind: ChannelKind,
    pub label: Option<String>,
    pub default: Value,
    /// Instance override; the effective value falls back to `default`.
    pub current: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub clamped: bool,
    pub visible: bool,
    /// Alias channels forward here instead of holding their own value.
    pub alias_target: Option<Reference>,
    /// Declared labels for enum channels, indexed by the value.
    pub enum_values: Vec<String>,
}

impl Channel {
    fn from_record(record: ChannelRecord) -> Channel {
        let mut default = record.value.unwrap_or_default();
        let mut current = record.current_value;
        // Enum values arrive as bare integers; retag them so the declared
        // label list applies.
        if record.kind == ChannelKind::Enum {
            default = Value::Enum(default.as_f64() as u32);
            current = current.map(|v| Value::Enum(v.as_f64() as u32));
        }
        Channel {
            id: record.id,
            kind: record.kind,
            label: record.label,
            default,
            current,
            min: record.min,
            max: record.max,
            clamped: record.clamped,
            visible: record.visible,
            alias_target: record.target_channel,
            enum_values: record.enum_values,
        }
    }

    /// Effective value: the instance override when present, else the default.
    pub fn effective(&self) -> Value {
        self.current.unwrap_or(self.default)
    }

    /// Label for the effective value of an enum channel.
    pub fn enum_label(&self) -> Option<&str> {
        match self.effective() {
            Value::Enum(i) => self.enum_values.get(i as usize).map(String::as_str),
            _ => None,
        }
    }

    /// Clamp `value` to the declared limits when `clamped` is set.
    pub fn clamp(&self, value: f64) -> f64 {
        if !self.clamped {
            return value;
        }
        let mut v = value;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        v
    }
}

/// A named element in the asset hierarchy (bone, mesh, or generic node).
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub name: Option<String>,
    pub kind: NodeKind,
    /// Possibly a reference into another asset; resolved lazily.
    pub parent: Option<Reference>,
    pub channels: BTreeMap<String, Channel>,
    /// True if synthesized from the asset's `source` rather than declared.
    pub inherited: bool,
}

/// A modifier: one channel plus formulas and requirement references.
#[derive(Debug, Clone)]
pub struct Modifier {
    pub id: String,
    pub name: Option<String>,
    pub parent: Option<Reference>,
    pub channel: Channel,
    pub formulas: Vec<FormulaRecord>,
    pub requires: Vec<Reference>,
    pub presentation_kind: String,
    pub presentation_label: String,
    pub region: Option<String>,
    pub group: String,
    pub favorite: bool,
    pub inherited: bool,
}

/// One loaded file's content, flattened over its `source` asset if any.
#[derive(Debug, Clone)]
pub struct Asset {
    pub id: AssetId,
    /// The path the document declared for itself, uncanonicalized.
    pub declared_path: String,
    pub source: Option<Reference>,
    pub nodes: BTreeMap<String, Node>,
    pub modifiers: BTreeMap<String, Modifier>,
    /// Recoverable problems hit while building this asset.
    pub issues: IssueList,
}

impl Asset {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn modifier(&self, id: &str) -> Option<&Modifier> {
        self.modifiers.get(id)
    }

    /// Look up a channel by owning node (or modifier) id and channel path.
    pub fn channel(&self, node_id: &str, channel_path: &str) -> Option<&Channel> {
        if let Some(node) = self.nodes.get(node_id) {
            return node.channels.get(channel_path);
        }
        self.modifiers.get(node_id).and_then(|m| {
            if m.channel.id == channel_path || channel_path == "value" {
                Some(&m.channel)
            } else {
                None
            }
        })
    }
}

/// Lazily-loading graph of assets. Owns the library index and the cache of
/// loaded files. Passed explicitly to operations that follow references.
#[derive(Debug, Default)]
pub struct AssetGraph {
    index: LibraryIndex,
    cache: HashMap<AssetId, Arc<Asset>>,
    /// Ids currently being constructed, to catch `source` cycles.
    loading: HashSet<AssetId>,
}

impl AssetGraph {
    pub fn new(index: LibraryIndex) -> AssetGraph {
        AssetGraph {
            index,
            cache: HashMap::new(),
            loading: HashSet::new(),
        }
    }

    pub fn index(&self) -> &LibraryIndex {
        &self.index
    }

    /// Replace the index (after a re-scan). Loaded assets stay valid: they
    /// are cached by id for the lifetime of the session.
    pub fn set_index(&mut self, index: LibraryIndex) {
        self.index = index;
    }

    pub fn loaded(&self, id: &AssetId) -> Option<&Arc<Asset>> {
        self.cache.get(id)
    }

    /// Load the asset published under `id`, or return the cached instance.
    /// Re-loading the same id always returns the same in-memory object.
    pub fn load(&mut self, id: &AssetId) -> Result<Arc<Asset>, DsonError> {
        if let Some(asset) = self.cache.get(id) {
            return Ok(Arc::clone(asset));
        }
        let entry = self.index.lookup(id)?;
        let path = entry.absolute_path.clone();
        debug!("loading asset {} from {}", id, path.display());
        let bytes = read_document_bytes(&path)?;
        let doc = Document::parse(&bytes)?;
        self.install(id.clone(), doc)
    }

    /// Load by library-relative path.
    pub fn load_path(&mut self, library_path: &str) -> Result<Arc<Asset>, DsonError> {
        self.load(&AssetId::from_path(library_path))
    }

    /// Install an already-parsed document under `id`. Used for documents
    /// that do not live in the library (user scenes, generated content).
    pub fn install_document(&mut self, doc: Document) -> Result<Arc<Asset>, DsonError> {
        let id = AssetId::from_path(&doc.asset_info.id);
        self.install(id, doc)
    }

    fn install(&mut self, id: AssetId, doc: Document) -> Result<Arc<Asset>, DsonError> {
        if !self.loading.insert(id.clone()) {
            return Err(DsonError::Resolve {
                reference: doc.source.map(|s| s.to_string()).unwrap_or_default(),
                reason: format!("source inheritance cycle through {id}"),
            });
        }
        let result = self.build_asset(id.clone(), doc);
        self.loading.remove(&id);

        // Construct-then-publish: the cache only ever holds complete assets.
        let asset = Arc::new(result?);
        self.cache.insert(id, Arc::clone(&asset));
        Ok(asset)
    }

    fn build_asset(&mut self, id: AssetId, doc: Document) -> Result<Asset, DsonError> {
        let mut issues = IssueList::new();
        let declared = AssetId::from_path(&doc.asset_info.id);
        if declared != id {
            issues.push(Issue::warning(
                IssueKind::Conflict,
                id.to_string(),
                format!("file declares id {declared}, indexed as {id}"),
            ));
        }

        let mut nodes = BTreeMap::new();
        for record in doc.node_library.into_iter().chain(doc.scene.nodes) {
            add_node(&mut nodes, record, false, &mut issues);
        }

        let mut modifiers = BTreeMap::new();
        for record in doc
            .modifier_library
            .into_iter()
            .chain(doc.scene.modifiers)
        {
            add_modifier(&mut modifiers, record, false, &mut issues);
        }

        // One-level flatten of the source asset: anything it declares that
        // this asset does not override is exposed here, marked inherited.
        if let Some(source_ref) = &doc.source {
            match self.load_source(source_ref) {
                Ok(source) => {
                    for (node_id, node) in &source.nodes {
                        if !nodes.contains_key(node_id) {
                            let mut inherited = node.clone();
                            inherited.inherited = true;
                            nodes.insert(node_id.clone(), inherited);
                        }
                    }
                    for (mod_id, modifier) in &source.modifiers {
                        if !modifiers.contains_key(mod_id) {
                            let mut inherited = modifier.clone();
                            inherited.inherited = true;
                            modifiers.insert(mod_id.clone(), inherited);
                        }
                    }
                }
                Err(e) => issues.push(Issue::from_error(&e, id.to_string())),
            }
        }

        Ok(Asset {
            id,
            declared_path: doc.asset_info.id,
            source: doc.source,
            nodes,
            modifiers,
            issues,
        })
    }

    fn load_source(&mut self, source_ref: &Reference) -> Result<Arc<Asset>, DsonError> {
        if !source_ref.has_path() {
            return Err(DsonError::Resolve {
                reference: source_ref.to_string(),
                reason: "source reference must name a file".to_string(),
            });
        }
        self.load(&AssetId::from_path(&source_ref.path()))
    }
}

fn add_node(
    nodes: &mut BTreeMap<String, Node>,
    record: NodeRecord,
    inherited: bool,
    issues: &mut IssueList,
) {
    // Node types outside the modeled set (cameras, lights). Skip and warn,
    // never abort the load.
    if record.kind == NodeKind::Other {
        issues.push(Issue::warning(
            IssueKind::UnsupportedConstruct,
            record.id.clone(),
            "unsupported node type; skipped",
        ));
        return;
    }
    if nodes.contains_key(&record.id) {
        issues.push(Issue::warning(
            IssueKind::Conflict,
            record.id.clone(),
            "duplicate node id in document",
        ));
        return;
    }
    let mut channels = BTreeMap::new();
    for c in record.channels {
        if c.kind == ChannelKind::Other {
            issues.push(Issue::warning(
                IssueKind::UnsupportedConstruct,
                format!("{}?{}", record.id, c.id),
                "unsupported channel type; skipped",
            ));
            continue;
        }
        channels.insert(c.id.clone(), Channel::from_record(c));
    }
    nodes.insert(
        record.id.clone(),
        Node {
            id: record.id,
            name: record.name,
            kind: record.kind,
            parent: record.parent,
            channels,
            inherited,
        },
    );
}

fn add_modifier(
    modifiers: &mut BTreeMap<String, Modifier>,
    record: ModifierRecord,
    inherited: bool,
    issues: &mut IssueList,
) {
    let ModifierRecord {
        id,
        name,
        parent,
        channel,
        formulas,
        requires,
        presentation,
        region,
        group,
        favorite,
    } = record;

    // Opaque modifier shapes (skin bindings, displacement maps) carry no
    // channel. Skip and warn, never abort the load.
    let Some(channel) = channel else {
        issues.push(Issue::warning(
            IssueKind::UnsupportedConstruct,
            id.clone(),
            "modifier without a channel; skipped",
        ));
        return;
    };
    if channel.kind == ChannelKind::Other {
        issues.push(Issue::warning(
            IssueKind::UnsupportedConstruct,
            id.clone(),
            "modifier channel of unsupported type; skipped",
        ));
        return;
    }

    if modifiers.contains_key(&id) {
        issues.push(Issue::warning(
            IssueKind::Conflict,
            id.clone(),
            "duplicate modifier id in document",
        ));
        return;
    }

    modifiers.insert(
        id.clone(),
        Modifier {
            id,
            name,
            parent,
            channel: Channel::from_record(channel),
            formulas,
            requires,
            presentation_kind: presentation.kind,
            presentation_label: presentation.label,
            region,
            group,
            favorite,
            inherited,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> Document {
        Document::parse(json.as_bytes()).unwrap()
    }

    #[test]
    fn load_is_cached_by_id() {
        let mut graph = AssetGraph::default();
        let asset = graph
            .install_document(doc(
                r#"{"asset_info": {"id": "/data/a.dsf", "type": "figure"}}"#,
            ))
            .unwrap();
        let again = graph.loaded(&AssetId::from_path("/data/a.dsf")).unwrap();
        assert!(Arc::ptr_eq(&asset, again));
    }

    #[test]
    fn source_inheritance_exposes_unoverridden_nodes() {
        let mut graph = AssetGraph::default();
        graph
            .install_document(doc(
                r#"{
                    "asset_info": {"id": "/data/b.dsf", "type": "figure"},
                    "node_library": [
                        {"id": "arm", "type": "bone", "channels": [
                            {"id": "twist", "type": "float", "value": 0.0}
                        ]},
                        {"id": "hand", "type": "bone"}
                    ]
                }"#,
            ))
            .unwrap();
        let a = graph
            .install_document(doc(
                r#"{
                    "asset_info": {"id": "/data/a.dsf", "type": "figure"},
                    "source": "/data/b.dsf",
                    "node_library": [
                        {"id": "hand", "type": "bone", "channels": [
                            {"id": "grip", "type": "float", "value": 1.0}
                        ]}
                    ]
                }"#,
            ))
            .unwrap();

        // Inherited from B, untouched by A.
        let arm = a.node("arm").unwrap();
        assert!(arm.inherited);
        assert_eq!(arm.channels["twist"].default, Value::Float(0.0));

        // A's own declaration takes precedence wholesale.
        let hand = a.node("hand").unwrap();
        assert!(!hand.inherited);
        assert!(hand.channels.contains_key("grip"));
    }

    #[test]
    fn modifier_without_channel_is_skipped_with_warning() {
        let mut graph = AssetGraph::default();
        let asset = graph
            .install_document(doc(
                r#"{
                    "asset_info": {"id": "/data/m.dsf", "type": "modifier"},
                    "modifier_library": [
                        {"id": "SkinBinding"},
                        {"id": "Real", "channel": {"id": "value", "type": "float", "value": 0.5}}
                    ]
                }"#,
            ))
            .unwrap();
        assert!(asset.modifier("SkinBinding").is_none());
        assert!(asset.modifier("Real").is_some());
        assert!(asset
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::UnsupportedConstruct));
    }

    #[test]
    fn unmodeled_node_and_channel_types_are_skipped_not_fatal() {
        let mut graph = AssetGraph::default();
        let asset = graph
            .install_document(doc(
                r#"{
                    "asset_info": {"id": "/data/scene.duf", "type": "scene"},
                    "node_library": [
                        {"id": "cam", "type": "camera"},
                        {"id": "key", "type": "light"},
                        {"id": "hip", "type": "bone", "channels": [
                            {"id": "rotation/x", "type": "float", "value": 0.0},
                            {"id": "custom/name", "type": "string"}
                        ]}
                    ]
                }"#,
            ))
            .unwrap();
        // The bone and its float channel survive the unknown siblings.
        assert!(asset.node("cam").is_none());
        assert!(asset.node("key").is_none());
        let hip = asset.node("hip").unwrap();
        assert!(hip.channels.contains_key("rotation/x"));
        assert!(!hip.channels.contains_key("custom/name"));
        let skipped = asset
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::UnsupportedConstruct)
            .count();
        assert_eq!(skipped, 3);
    }

    #[test]
    fn enum_channels_carry_their_label_list() {
        let mut graph = AssetGraph::default();
        let asset = graph
            .install_document(doc(
                r#"{
                    "asset_info": {"id": "/data/e.dsf", "type": "figure"},
                    "node_library": [
                        {"id": "eye", "type": "node", "channels": [
                            {"id": "side", "type": "enum", "value": 0,
                             "current_value": 1,
                             "enum_values": ["Left", "Right"]}
                        ]}
                    ]
                }"#,
            ))
            .unwrap();
        let side = &asset.node("eye").unwrap().channels["side"];
        assert_eq!(side.effective(), Value::Enum(1));
        assert_eq!(side.effective().as_f64(), 1.0);
        assert_eq!(side.enum_label(), Some("Right"));
    }

    #[test]
    fn favorite_flag_survives_the_load() {
        let mut graph = AssetGraph::default();
        let asset = graph
            .install_document(doc(
                r#"{
                    "asset_info": {"id": "/data/f.dsf", "type": "modifier"},
                    "modifier_library": [
                        {"id": "Pinned", "favorite": true,
                         "channel": {"id": "value", "type": "float", "value": 0.0}},
                        {"id": "Plain",
                         "channel": {"id": "value", "type": "float", "value": 0.0}}
                    ]
                }"#,
            ))
            .unwrap();
        assert!(asset.modifier("Pinned").unwrap().favorite);
        assert!(!asset.modifier("Plain").unwrap().favorite);
    }

    #[test]
    fn channel_clamping() {
        let channel = Channel {
            id: "value".into(),
            kind: ChannelKind::Float,
            label: None,
            default: Value::Float(0.0),
            current: None,
            min: Some(0.0),
            max: Some(1.0),
            clamped: true,
            visible: true,
            alias_target: None,
            enum_values: Vec::new(),
        };
        assert_eq!(channel.clamp(1.5), 1.0);
        assert_eq!(channel.clamp(-0.5), 0.0);
        assert_eq!(channel.clamp(0.25), 0.25);
    }
}
