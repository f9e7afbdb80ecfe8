//! Contracts for the external collaborators.
//!
//! The service consumes two remote systems and nothing more: the index
//! engine (streaming search plus "what commit do you have?") and the
//! version-control server (commit archives and changed-path diffs). Both are
//! trait seams so tests substitute scripted fakes.

use crate::error::BackendError;
use crate::pattern::IndexQuery;
use crate::protocol::ChunkMatch;
use crate::types::{CommitOid, RepoId};
use async_trait::async_trait;
use std::io::Read;
use tokio_util::sync::CancellationToken;

/// One file match reported by the index engine.
#[derive(Debug, Clone)]
pub struct IndexFileMatch {
    pub path: String,
    /// The commit the index served this result from. The hybrid protocol
    /// compares this against the expected indexed commit on every result.
    pub version: String,
    pub chunk_matches: Vec<ChunkMatch>,
    pub language: Option<String>,
}

/// Aggregate statistics reported when an index search stream closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    /// Number of index backends that crashed while serving the stream.
    /// Any non-zero value makes the result set untrustworthy.
    pub crashes: u32,
}

/// Options for one index search stream.
#[derive(Debug, Clone, Default)]
pub struct IndexSearchOptions {
    /// Stop streaming once this many matches have been sent (0 = engine
    /// default).
    pub max_matches: u64,
}

/// Receives batches from a running index search.
///
/// Implementations must be cheap and non-blocking; the engine may call from
/// multiple tasks.
pub trait IndexSender: Send + Sync {
    fn send(&self, batch: Vec<IndexFileMatch>);
}

/// The external index engine.
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Returns the commit the index currently has ingested for `repo`, or
    /// `None` when the repository is not indexed.
    async fn list(&self, repo: RepoId) -> Result<Option<CommitOid>, BackendError>;

    /// Runs a streaming search, pushing result batches into `sender`.
    ///
    /// Implementations observe `cancel` at every batch boundary and return
    /// promptly once it fires; a canceled stream is not an error.
    async fn stream_search(
        &self,
        query: &IndexQuery,
        opts: &IndexSearchOptions,
        cancel: &CancellationToken,
        sender: &dyn IndexSender,
    ) -> Result<IndexStats, BackendError>;
}

/// How a path differs between two commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
}

/// One entry of a changed-paths diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub status: FileStatus,
    pub path: String,
}

impl ChangedFile {
    #[must_use]
    pub fn new(status: FileStatus, path: impl Into<String>) -> Self {
        Self {
            status,
            path: path.into(),
        }
    }
}

/// The version-control server.
#[async_trait]
pub trait GitRemote: Send + Sync {
    /// Fetches a tar archive of `commit`'s working tree. With `paths` set,
    /// the archive is restricted to those paths.
    ///
    /// The reader is consumed on a blocking thread; implementations should
    /// hand back a streaming body, not a buffered one, when they can.
    async fn fetch_tar(
        &self,
        repo: &str,
        commit: &CommitOid,
        paths: Option<&[String]>,
    ) -> Result<Box<dyn Read + Send>, BackendError>;

    /// Lists paths that differ from `base` to `head`.
    async fn changed_files(
        &self,
        repo: &str,
        base: &CommitOid,
        head: &CommitOid,
    ) -> Result<Vec<ChangedFile>, BackendError>;
}
