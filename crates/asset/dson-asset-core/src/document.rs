//! Wire-format records for one asset file.
//!
//! A document is a self-describing hierarchical JSON tree with a declared
//! `asset_info` header and libraries of node/modifier records. Record shapes
//! are a closed set of typed structs, validated at parse time; unknown record
//! shapes become `UnsupportedConstruct` issues at load, never panics.
//!
//! Files may be gzip-compressed. There is no marker other than the leading
//! magic bytes, so [`read_document_bytes`] sniffs and decompresses.

use dson_api_core::{DsonError, Reference, Value};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Declared identity of the containing file. `id` is the library-relative
/// path the file publishes itself under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub revision: String,
}

/// Channel value types. The wire format also carries kinds with no scalar
/// semantics (`string`, `color`, `file`); those parse as [`ChannelKind::Other`]
/// and are skipped at load with an `UnsupportedConstruct` warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ChannelKind {
    #[default]
    Float,
    Bool,
    Int,
    Enum,
    Alias,
    Other,
}

impl From<String> for ChannelKind {
    fn from(kind: String) -> ChannelKind {
        match kind.as_str() {
            "float" => ChannelKind::Float,
            "bool" => ChannelKind::Bool,
            "int" => ChannelKind::Int,
            "enum" => ChannelKind::Enum,
            "alias" => ChannelKind::Alias,
            _ => ChannelKind::Other,
        }
    }
}

/// A typed scalar value slot. `value` is the default; `current_value` is the
/// instance override when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub current_value: Option<Value>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub clamped: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Alias channels forward to this channel instead of holding a value.
    #[serde(default)]
    pub target_channel: Option<Reference>,
    /// Declared labels for `enum` channels, indexed by the value.
    #[serde(default)]
    pub enum_values: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Node types. Types outside the modeled set (`camera`, `light`) parse as
/// [`NodeKind::Other`] and are skipped at load, never aborting the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum NodeKind {
    #[default]
    Node,
    Figure,
    Bone,
    Geometry,
    Other,
}

impl From<String> for NodeKind {
    fn from(kind: String) -> NodeKind {
        match kind.as_str() {
            "node" => NodeKind::Node,
            "figure" => NodeKind::Figure,
            "bone" => NodeKind::Bone,
            "geometry" => NodeKind::Geometry,
            _ => NodeKind::Other,
        }
    }
}

/// A named element in the asset's hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub parent: Option<Reference>,
    #[serde(default)]
    pub channels: Vec<ChannelRecord>,
}

/// One stack-machine operation inside a formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub op: String,
    /// Channel read for `push` operations.
    #[serde(default)]
    pub url: Option<Reference>,
    /// Literal operand for `push` operations: a scalar, or a spline control
    /// point `[x, y, tension, continuity, bias]`.
    #[serde(default)]
    pub val: Option<OperandRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OperandRecord {
    Scalar(f64),
    Knot(Vec<f64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StageRecord {
    #[default]
    Sum,
    Mult,
    /// Replaces the summed contributions on its target channel.
    Exclusive,
}

/// An ordered list of operations producing one output channel value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaRecord {
    pub output: Reference,
    #[serde(default)]
    pub stage: StageRecord,
    pub operations: Vec<OperationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PresentationRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub label: String,
}

/// A bundle of one channel plus formulas and requirement references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent: Option<Reference>,
    /// Absent on opaque modifier shapes (e.g. displacement maps), which are
    /// skipped with an `UnsupportedConstruct` warning.
    #[serde(default)]
    pub channel: Option<ChannelRecord>,
    #[serde(default)]
    pub formulas: Vec<FormulaRecord>,
    /// Explicitly declared modifier requirements, resolved lazily.
    #[serde(default)]
    pub requires: Vec<Reference>,
    #[serde(default)]
    pub presentation: PresentationRecord,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub favorite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SceneRecord {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub modifiers: Vec<ModifierRecord>,
}

/// One parsed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub asset_info: AssetInfo,
    /// Asset-level inheritance: nodes and modifiers of the source asset are
    /// exposed through this one unless overridden.
    #[serde(default)]
    pub source: Option<Reference>,
    #[serde(default)]
    pub node_library: Vec<NodeRecord>,
    #[serde(default)]
    pub modifier_library: Vec<ModifierRecord>,
    #[serde(default)]
    pub scene: SceneRecord,
}

impl Document {
    pub fn parse(bytes: &[u8]) -> Result<Document, DsonError> {
        serde_json::from_slice(bytes).map_err(|e| DsonError::Parse {
            reason: e.to_string(),
        })
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read a document file, transparently decompressing gzip.
pub fn read_document_bytes(path: &Path) -> Result<Vec<u8>, DsonError> {
    let raw = std::fs::read(path).map_err(|e| DsonError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if raw.len() >= 2 && raw[..2] == GZIP_MAGIC {
        let mut decoded = Vec::with_capacity(raw.len() * 4);
        flate2::read::GzDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| DsonError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        return Ok(decoded);
    }
    Ok(raw)
}

/// Read a bounded prefix of a document file, for id sniffing without parsing
/// the full graph. Handles gzip by decompressing only up to `limit` bytes.
pub fn read_document_prefix(path: &Path, limit: usize) -> Result<Vec<u8>, DsonError> {
    let file = std::fs::File::open(path).map_err(|e| DsonError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut reader = std::io::BufReader::new(file);
    let head = peek_two(&mut reader).map_err(|e| DsonError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut buf = vec![0u8; limit];
    let n = if head == GZIP_MAGIC {
        read_up_to(&mut flate2::bufread::GzDecoder::new(reader), &mut buf)
    } else {
        read_up_to(&mut reader, &mut buf)
    }
    .map_err(|e| DsonError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    buf.truncate(n);
    Ok(buf)
}

fn peek_two(reader: &mut impl std::io::BufRead) -> std::io::Result<[u8; 2]> {
    let buf = reader.fill_buf()?;
    let mut head = [0u8; 2];
    let n = buf.len().min(2);
    head[..n].copy_from_slice(&buf[..n]);
    Ok(head)
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            // A truncated gzip stream past the prefix is fine for sniffing.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Extract the declared `asset_info.id` from a document prefix without
/// parsing the whole file. The header is by convention the first key, so a
/// small scan over the prefix is enough.
pub fn sniff_asset_id(prefix: &[u8]) -> Option<String> {
    // The prefix may end mid-character; scan the valid portion.
    let text = match std::str::from_utf8(prefix) {
        Ok(t) => t,
        Err(e) => std::str::from_utf8(&prefix[..e.valid_up_to()]).ok()?,
    };
    let info_at = text.find("\"asset_info\"")?;
    let after = &text[info_at..];
    let id_at = after.find("\"id\"")?;
    let after_id = &after[id_at + 4..];
    let colon = after_id.find(':')?;
    let rest = after_id[colon + 1..].trim_start();
    let mut chars = rest.char_indices();
    match chars.next() {
        Some((_, '"')) => {}
        _ => return None,
    }
    let mut out = String::new();
    let mut escaped = false;
    for (_, c) in chars {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some(out);
        } else {
            out.push(c);
        }
    }
    None
}
