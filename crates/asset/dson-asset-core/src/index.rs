//! Library index: catalog of every known asset file and its declared id.
//!
//! Built by scanning declared root directories once and reused across
//! sessions via a flat JSON file. The index is the only component that walks
//! the filesystem tree; everything else addresses assets by id. A stale index
//! yields `NotFound` until the caller re-scans, a recoverable condition
//! rather than a fatal one.

use crate::document::{read_document_prefix, sniff_asset_id};
use dson_api_core::{AssetId, DsonError, Issue, IssueKind, IssueList};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// How much of each candidate file the scan reads to sniff the declared id.
const SNIFF_PREFIX_BYTES: usize = 8 * 1024;

/// File extensions considered asset documents.
const DOCUMENT_EXTENSIONS: [&str; 2] = ["dsf", "duf"];

/// One indexed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: AssetId,
    /// The id string exactly as the file declared it (uncanonicalized).
    pub declared_id: String,
    pub absolute_path: PathBuf,
    /// Index into `roots` of the root this entry came from.
    pub root: usize,
}

/// Flat mapping from asset id to file path, plus scan metadata.
///
/// Rebuilt wholesale by [`LibraryIndex::rescan`], never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LibraryIndex {
    roots: Vec<PathBuf>,
    entries: BTreeMap<AssetId, IndexEntry>,
    scanned_at: u64,
}

impl LibraryIndex {
    /// Scan `roots` and build an index. Duplicate ids are resolved
    /// first-registered-root-wins and reported as warnings.
    pub fn scan(roots: Vec<PathBuf>) -> (LibraryIndex, IssueList) {
        let mut index = LibraryIndex {
            roots,
            entries: BTreeMap::new(),
            scanned_at: 0,
        };
        let issues = index.rescan();
        (index, issues)
    }

    /// Rebuild the index from scratch. Idempotent: scanning twice over an
    /// unchanged tree yields an identical mapping.
    pub fn rescan(&mut self) -> IssueList {
        let mut issues = IssueList::new();
        let mut entries: BTreeMap<AssetId, IndexEntry> = BTreeMap::new();

        for (root_idx, root) in self.roots.iter().enumerate() {
            let mut candidates = Vec::new();
            collect_documents(root, &mut candidates, &mut issues);
            // Deterministic merge order regardless of directory iteration.
            candidates.sort();

            // Sniffing each file is independent read-only work; fan it out.
            let sniffed: Vec<(PathBuf, Result<Option<String>, DsonError>)> = candidates
                .into_par_iter()
                .map(|path| {
                    let result = read_document_prefix(&path, SNIFF_PREFIX_BYTES)
                        .map(|prefix| sniff_asset_id(&prefix));
                    (path, result)
                })
                .collect();

            for (path, result) in sniffed {
                let declared_id = match result {
                    Ok(Some(id)) => id,
                    Ok(None) => {
                        issues.push(Issue::warning(
                            IssueKind::Parse,
                            path.display().to_string(),
                            "no declared asset id in file header",
                        ));
                        continue;
                    }
                    Err(e) => {
                        issues.push(Issue::from_error(&e, path.display().to_string()));
                        continue;
                    }
                };
                let id = AssetId::from_path(&declared_id);
                if let Some(existing) = entries.get(&id) {
                    issues.push(Issue::warning(
                        IssueKind::Conflict,
                        id.to_string(),
                        format!(
                            "duplicate asset id; keeping {} over {}",
                            existing.absolute_path.display(),
                            path.display()
                        ),
                    ));
                    continue;
                }
                debug!("indexed {} -> {}", id, path.display());
                entries.insert(
                    id.clone(),
                    IndexEntry {
                        id,
                        declared_id,
                        absolute_path: path,
                        root: root_idx,
                    },
                );
            }
        }

        self.entries = entries;
        self.scanned_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        issues
    }

    /// Look up an asset id. A miss is recoverable: re-scan and retry.
    pub fn lookup(&self, id: &AssetId) -> Result<&IndexEntry, DsonError> {
        self.entries.get(id).ok_or_else(|| DsonError::NotFound {
            id: id.to_string(),
        })
    }

    /// Look up by library-relative path (canonicalized to an id first).
    pub fn lookup_path(&self, library_path: &str) -> Result<&IndexEntry, DsonError> {
        self.lookup(&AssetId::from_path(library_path))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scanned_at(&self) -> u64 {
        self.scanned_at
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Persist the whole index as one flat JSON document.
    pub fn save(&self, path: &Path) -> Result<(), DsonError> {
        let data = serde_json::to_vec_pretty(self).map_err(|e| DsonError::Parse {
            reason: e.to_string(),
        })?;
        std::fs::write(path, data).map_err(|e| DsonError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<LibraryIndex, DsonError> {
        let data = std::fs::read(path).map_err(|e| DsonError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&data).map_err(|e| DsonError::Parse {
            reason: e.to_string(),
        })
    }
}

fn collect_documents(dir: &Path, out: &mut Vec<PathBuf>, issues: &mut IssueList) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot read {}: {}", dir.display(), e);
            issues.push(Issue::warning(
                IssueKind::Io,
                dir.display().to_string(),
                e.to_string(),
            ));
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_documents(&path, out, issues);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| DOCUMENT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_doc(dir: &Path, rel: &str, id: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            format!(r#"{{"asset_info": {{"id": "{id}", "type": "modifier"}}}}"#),
        )
        .unwrap();
    }

    #[test]
    fn scan_indexes_declared_ids() {
        let dir = tempfile::tempdir().unwrap();
        write_doc(dir.path(), "data/a.dsf", "/data/a.dsf");
        write_doc(dir.path(), "data/deep/b.dsf", "/data/deep/b.dsf");
        fs::write(dir.path().join("data/notes.txt"), "ignored").unwrap();

        let (index, issues) = LibraryIndex::scan(vec![dir.path().to_path_buf()]);
        assert!(issues.is_empty(), "{issues:?}");
        assert_eq!(index.len(), 2);
        assert!(index.lookup(&AssetId::from_path("/data/a.dsf")).is_ok());
        assert!(index.lookup_path("/data/deep/b.dsf").is_ok());
    }

    #[test]
    fn first_registered_root_wins_for_duplicates() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_doc(first.path(), "data/dup.dsf", "/data/dup.dsf");
        write_doc(second.path(), "data/dup.dsf", "/data/dup.dsf");

        let (index, issues) = LibraryIndex::scan(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(index.len(), 1);
        let entry = index.lookup_path("/data/dup.dsf").unwrap();
        assert_eq!(entry.root, 0);
        assert!(entry.absolute_path.starts_with(first.path()));
        assert!(issues
            .iter()
            .any(|i| i.kind == IssueKind::Conflict), "{issues:?}");
    }

    #[test]
    fn stale_index_misses_until_rescan() {
        let dir = tempfile::tempdir().unwrap();
        write_doc(dir.path(), "data/a.dsf", "/data/a.dsf");
        let (mut index, _) = LibraryIndex::scan(vec![dir.path().to_path_buf()]);

        write_doc(dir.path(), "data/late.dsf", "/data/late.dsf");
        let miss = index.lookup_path("/data/late.dsf");
        assert!(matches!(miss, Err(DsonError::NotFound { .. })));

        index.rescan();
        assert!(index.lookup_path("/data/late.dsf").is_ok());
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_doc(dir.path(), "data/a.dsf", "/data/a.dsf");
        let (index, _) = LibraryIndex::scan(vec![dir.path().to_path_buf()]);

        let file = dir.path().join("index.json");
        index.save(&file).unwrap();
        let loaded = LibraryIndex::load(&file).unwrap();
        assert_eq!(loaded.len(), index.len());
        assert_eq!(
            loaded.lookup_path("/data/a.dsf").unwrap(),
            index.lookup_path("/data/a.dsf").unwrap()
        );
    }

    #[test]
    fn gzip_documents_are_sniffed() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        fs::create_dir_all(&path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(
            fs::File::create(path.join("z.dsf")).unwrap(),
            flate2::Compression::default(),
        );
        enc.write_all(br#"{"asset_info": {"id": "/data/z.dsf", "type": "figure"}}"#)
            .unwrap();
        enc.finish().unwrap();

        let (index, issues) = LibraryIndex::scan(vec![dir.path().to_path_buf()]);
        assert!(issues.is_empty(), "{issues:?}");
        assert!(index.lookup_path("/data/z.dsf").is_ok());
    }
}
