//! Identifiers for assets and channels.

use crate::escape::{quote, unquote};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of one loaded document, derived from its library-relative
/// path. Canonicalized (lowercased, re-escaped) so differing case or escaping
/// of the same file unify to one id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct AssetId(String);

impl AssetId {
    /// Canonicalize a library-relative path into an asset id.
    pub fn from_path(path: &str) -> Self {
        AssetId(quote(&unquote(path)).to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one channel: the asset it lives in, the node (or modifier) id
/// inside that asset, and the channel path on the node (e.g. `rotation/x`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ChannelKey {
    pub asset: AssetId,
    pub node: String,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(asset: AssetId, node: impl Into<String>, channel: impl Into<String>) -> Self {
        ChannelKey {
            asset,
            node: node.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}?{}", self.asset, self.node, self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_id_unifies_case_and_escaping() {
        let a = AssetId::from_path("/Data/DAZ%203D/Figure.dsf");
        let b = AssetId::from_path("/data/daz 3d/figure.dsf");
        assert_eq!(a, b);
    }

    #[test]
    fn channel_key_display() {
        let key = ChannelKey::new(AssetId::from_path("/data/f.dsf"), "hip", "rotation/x");
        assert_eq!(key.to_string(), "/data/f.dsf#hip?rotation/x");
    }
}
