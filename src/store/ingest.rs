//! Tar ingest: turns a fetched commit archive into a cached directory.
//!
//! The tree is written under `<staging>/tree/` with a path-sorted
//! `manifest.json` beside it; the store publishes the staging directory with
//! an atomic rename so a partially-written archive is never visible.
//!
//! Read-side failures (truncated stream, corrupt headers) classify as
//! temporary; write-side failures are local disk problems and stay fatal.

use crate::error::StoreError;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Component, Path};

/// Name of the content subdirectory inside an archive directory.
pub const TREE_DIR: &str = "tree";

/// Name of the entry manifest inside an archive directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One file of a cached archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
}

/// The deterministic entry list of a cached archive, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Total content bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Looks up an entry by exact path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Reads a manifest back from an archive directory.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` when the manifest is missing or unreadable.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read(dir.join(MANIFEST_FILE))?;
        serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Io(format!("manifest corrupt in {}: {e}", dir.display())))
    }
}

/// Filtering applied while ingesting.
pub struct IngestFilter<'a> {
    /// Files larger than this are dropped...
    pub max_file_size: u64,
    /// ...unless one of these globs matches their path.
    pub always_search: &'a GlobSet,
    /// Paths for which this returns true are omitted from the cache
    /// entirely, so later searches never see them.
    pub ignore: Option<&'a (dyn Fn(&str) -> bool + Send + Sync)>,
}

impl IngestFilter<'_> {
    fn skips(&self, path: &str, size: u64) -> bool {
        if size > self.max_file_size && !self.always_search.is_match(path) {
            return true;
        }
        match self.ignore {
            Some(ignore) => ignore(path),
            None => false,
        }
    }
}

/// Extracts a tar stream into `staging`, returning the manifest.
///
/// # Errors
///
/// Tar-level failures return [`StoreError::TarHeader`] (temporary); local
/// filesystem failures return [`StoreError::Io`].
pub fn ingest(
    reader: impl Read,
    staging: &Path,
    filter: &IngestFilter<'_>,
) -> Result<Manifest, StoreError> {
    let tree = staging.join(TREE_DIR);
    std::fs::create_dir_all(&tree)?;

    let mut archive = tar::Archive::new(reader);
    // Later duplicate entries replace earlier ones, matching extraction order
    let mut sizes: ahash::AHashMap<String, u64> = ahash::AHashMap::new();
    let mut buf: Vec<u8> = Vec::new();

    for entry in archive.entries().map_err(tar_header_err)? {
        let mut entry = entry.map_err(tar_header_err)?;

        // Pax metadata and anything without content (directories, hard
        // links, devices) never reaches the cache
        let entry_type = entry.header().entry_type();
        if entry_type != tar::EntryType::Regular && !entry_type.is_symlink() {
            continue;
        }

        let raw_path = entry.path().map_err(tar_header_err)?;
        let Some(rel) = sanitize_path(&raw_path) else {
            continue;
        };

        buf.clear();
        if entry_type.is_symlink() {
            // A symlink is cached as a text file holding its target, so
            // downstream scanning needs no special case
            let target = entry.link_name().map_err(tar_header_err)?;
            let target = target
                .as_deref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            if filter.skips(&rel, target.len() as u64) {
                continue;
            }
            buf.extend_from_slice(target.as_bytes());
        } else {
            let declared = entry.header().size().map_err(tar_header_err)?;
            if filter.skips(&rel, declared) {
                continue;
            }
            entry.read_to_end(&mut buf).map_err(tar_header_err)?;
        }

        let dest = tree.join(&rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &buf)?;
        sizes.insert(rel, buf.len() as u64);
    }

    let mut entries: Vec<ManifestEntry> = sizes
        .into_iter()
        .map(|(path, size)| ManifestEntry { path, size })
        .collect();
    entries.sort_unstable_by(|a, b| a.path.cmp(&b.path));
    let manifest = Manifest { entries };

    let encoded = serde_json::to_vec(&manifest)
        .map_err(|e| StoreError::Io(format!("manifest encode failed: {e}")))?;
    std::fs::write(staging.join(MANIFEST_FILE), encoded)?;

    Ok(manifest)
}

fn tar_header_err(e: std::io::Error) -> StoreError {
    StoreError::TarHeader(e.to_string())
}

/// Normalizes a tar entry path to a safe, slash-separated relative path.
/// Absolute paths and `..` traversal are dropped rather than trusted.
fn sanitize_path(p: &Path) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for comp in p.components() {
        match comp {
            Component::Normal(c) => parts.push(c.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
