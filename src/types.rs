//! Type-safe newtypes for snapgrep.
//!
//! These newtypes provide compile-time safety and semantic clarity
//! for core domain concepts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Repository identifier assigned by the index engine.
///
/// Using u32 matches the index engine's repository numbering. The newtype
/// prevents accidental mixing with other integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(pub u32);

impl RepoId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0;
        write!(f, "repo:{id}")
    }
}

impl From<u32> for RepoId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<RepoId> for u32 {
    fn from(id: RepoId) -> Self {
        id.0
    }
}

/// An absolute commit identifier: exactly 40 lowercase hex characters.
///
/// Symbolic refs ("HEAD", branch names) are rejected at construction, so
/// holding a `CommitOid` is proof the request has been resolved to a single
/// immutable tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitOid(String);

impl CommitOid {
    /// Parses a commit identifier, requiring the absolute 40-hex form.
    ///
    /// Uppercase hex digits are normalized to lowercase.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the input is empty, has the
    /// wrong length, or contains non-hex characters.
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.is_empty() {
            return Err("commit must be non-empty".to_string());
        }
        if s.len() != 40 {
            return Err(format!(
                "commit must be a 40-hex absolute id, got {:?} ({} chars)",
                s,
                s.len()
            ));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("commit contains non-hex characters: {s:?}"));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 7 characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..7]
    }
}

impl fmt::Display for CommitOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CommitOid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cache key for one commit's working tree: `(repo, commit)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub repo: String,
    pub commit: CommitOid,
}

impl ArchiveKey {
    #[must_use]
    pub fn new(repo: impl Into<String>, commit: CommitOid) -> Self {
        Self {
            repo: repo.into(),
            commit,
        }
    }

    /// Stable on-disk stem for this key: the first 16 hex characters of the
    /// SHA-256 over `repo NUL commit NUL paths-digest`.
    ///
    /// `paths_digest` distinguishes a full archive from one fetched with a
    /// path-subset filter; pass [`FULL_TREE_DIGEST`] for a full fetch.
    #[must_use]
    pub fn cache_stem(&self, paths_digest: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.repo.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.commit.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(paths_digest.as_bytes());
        let result = hasher.finalize();
        // First 8 bytes = 16 hex characters, enough to never collide in one cache
        result[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.commit.short())
    }
}

/// Digest value used by [`ArchiveKey::cache_stem`] for full-tree fetches.
pub const FULL_TREE_DIGEST: &str = "full";

/// Digest of a sorted path-subset filter, for subset archive fetches.
#[must_use]
pub fn paths_digest(paths: &[String]) -> String {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for p in sorted {
        hasher.update(p.as_bytes());
        hasher.update([0u8]);
    }
    let result = hasher.finalize();
    result[..8].iter().map(|b| format!("{b:02x}")).collect()
}

// Compile-time assertions for thread safety.
// These ensure Send+Sync remain implemented and catch regressions.
#[cfg(test)]
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}

    assert_send_sync::<RepoId>();
    assert_send_sync::<CommitOid>();
    assert_send_sync::<ArchiveKey>();
};

#[cfg(test)]
mod tests {
    use super::*;

    const DEADBEEF: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    #[test]
    fn test_commit_parse_valid() {
        let oid = CommitOid::parse(DEADBEEF).unwrap();
        assert_eq!(oid.as_str(), DEADBEEF);
        assert_eq!(oid.short(), "deadbee");
    }

    #[test]
    fn test_commit_parse_normalizes_case() {
        let upper = DEADBEEF.to_ascii_uppercase();
        let oid = CommitOid::parse(&upper).unwrap();
        assert_eq!(oid.as_str(), DEADBEEF);
    }

    #[test]
    fn test_commit_parse_rejects_symbolic() {
        assert!(CommitOid::parse("HEAD").is_err());
        assert!(CommitOid::parse("main").is_err());
        assert!(CommitOid::parse("").is_err());
        // Right length, wrong alphabet
        assert!(CommitOid::parse(&"z".repeat(40)).is_err());
    }

    #[test]
    fn test_cache_stem_is_stable() {
        let key = ArchiveKey::new("github.com/org/repo", CommitOid::parse(DEADBEEF).unwrap());
        let a = key.cache_stem(FULL_TREE_DIGEST);
        let b = key.cache_stem(FULL_TREE_DIGEST);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_stem_separates_subsets() {
        let key = ArchiveKey::new("github.com/org/repo", CommitOid::parse(DEADBEEF).unwrap());
        let full = key.cache_stem(FULL_TREE_DIGEST);
        let subset = key.cache_stem(&paths_digest(&["a.go".to_string()]));
        assert_ne!(full, subset);
    }

    #[test]
    fn test_paths_digest_is_order_independent() {
        let a = paths_digest(&["b.go".to_string(), "a.go".to_string()]);
        let b = paths_digest(&["a.go".to_string(), "b.go".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_repo_id_roundtrip() {
        let id = RepoId::new(42);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(u32::from(id), 42);
        assert_eq!(id.to_string(), "repo:42");
    }
}
