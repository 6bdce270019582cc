//! Parsing of DSON reference strings.
//!
//! References look like URLs but are not: the scheme may contain characters
//! a conforming URL parser rejects (`%`, `/`), and the fragment comes
//! *before* the query:
//!
//!   scheme:path#fragment?query
//!
//! - `scheme` optionally disambiguates which asset a fragment id lives in
//!   (two files may publish the same fragment id).
//! - `path` is a file location: absolute within the library when it starts
//!   with `/`, otherwise relative to the referencing document.
//! - `fragment` names a node or modifier inside the resolved document.
//! - `query` names a channel/property path on that node.
//!
//! Escaping is preserved per component: the raw escaped text is what the
//! document said, and two references that differ only in escaping are *not*
//! equal. Decoded accessors are provided for display and matching.

use crate::escape::{quote, unquote};
use crate::error::DsonError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Characters permitted in the scheme component. Deliberately wider than
/// RFC 3986: real documents put `%`-escapes and slashes in schemes.
fn is_scheme_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_' | '%' | '/')
}

/// A parsed reference. Components hold their *escaped* text; equality and
/// hashing are on the escaped form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Reference {
    scheme: String,
    path: String,
    fragment: String,
    query: String,
}

impl Reference {
    /// Parse a raw reference string. This never fails on component content
    /// (the grammar is permissive by design); an empty string is the only
    /// rejected input, since it references nothing.
    pub fn parse(raw: &str) -> Result<Self, DsonError> {
        if raw.is_empty() {
            return Err(DsonError::Parse {
                reason: "empty reference".to_string(),
            });
        }
        let mut rest = raw;
        let mut scheme = "";

        if let Some(i) = rest.find(':') {
            if i > 0 && rest[..i].chars().all(is_scheme_char) {
                scheme = &rest[..i];
                rest = &rest[i + 1..];
            }
        }

        // Fragment precedes query in this syntax, but split the query off
        // first since it is the trailing component.
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };
        let (path, fragment) = match rest.split_once('#') {
            Some((p, f)) => (p, f),
            None => (rest, ""),
        };

        Ok(Reference {
            scheme: scheme.to_string(),
            path: path.to_string(),
            fragment: fragment.to_string(),
            query: query.to_string(),
        })
    }

    /// Build a reference from already-decoded components, escaping them.
    pub fn from_parts(scheme: &str, path: &str, fragment: &str, query: &str) -> Self {
        Reference {
            scheme: quote(scheme),
            path: quote(path),
            fragment: quote(fragment),
            query: quote(query),
        }
    }

    /// Decoded scheme, empty if absent.
    pub fn scheme(&self) -> String {
        unquote(&self.scheme)
    }

    /// Decoded path, empty if absent.
    pub fn path(&self) -> String {
        unquote(&self.path)
    }

    /// Decoded fragment (node id), empty if absent.
    pub fn fragment(&self) -> String {
        unquote(&self.fragment)
    }

    /// Decoded query (channel path), empty if absent.
    pub fn query(&self) -> String {
        unquote(&self.query)
    }

    pub fn escaped_scheme(&self) -> &str {
        &self.scheme
    }

    pub fn escaped_path(&self) -> &str {
        &self.path
    }

    pub fn escaped_fragment(&self) -> &str {
        &self.fragment
    }

    pub fn escaped_query(&self) -> &str {
        &self.query
    }

    pub fn has_scheme(&self) -> bool {
        !self.scheme.is_empty()
    }

    pub fn has_path(&self) -> bool {
        !self.path.is_empty()
    }

    pub fn has_fragment(&self) -> bool {
        !self.fragment.is_empty()
    }

    pub fn has_query(&self) -> bool {
        !self.query.is_empty()
    }

    /// True if the path component is library-absolute (`/data/...`).
    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    /// True if this reference stays inside the document it appears in:
    /// no file path and no disambiguating scheme, only `#fragment?query`.
    pub fn is_same_document(&self) -> bool {
        !self.has_path() && !self.has_scheme()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}:", self.scheme)?;
        }
        f.write_str(&self.path)?;
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = DsonError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

// Serde support: serialize as the raw string, deserialize from it.
impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Reference, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Reference::parse(&s).map_err(de::Error::custom)
    }
}
