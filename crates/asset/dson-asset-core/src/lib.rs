//! dson-asset-core: library indexing, asset loading, reference resolution.
//!
//! The pieces fit together in the order a character import runs them:
//!
//! - [`index`] scans declared root directories once and maps asset ids to
//!   file paths. It is the only module that walks the filesystem tree.
//! - [`document`] parses one file's records into typed structs.
//! - [`graph`] owns the id-keyed cache of loaded [`Asset`](graph::Asset)s and
//!   performs the one-level "source" inheritance flatten.
//! - [`resolve`] turns a parsed [`Reference`](dson_api_core::Reference) plus
//!   a resolution context into a concrete target, loading files on demand.

pub mod document;
pub mod graph;
pub mod index;
pub mod resolve;

pub use document::{ChannelKind, ChannelRecord, Document, FormulaRecord, ModifierRecord, NodeRecord};
pub use graph::{Asset, AssetGraph, Channel, Modifier, Node};
pub use index::{IndexEntry, LibraryIndex};
pub use resolve::{resolve, ResolutionContext, Target};
