//! The hybrid coordinator: reconciles the index's snapshot with the exact
//! commit the caller asked for.
//!
//! The index serves some *indexed* commit that trails the caller's *target*
//! commit. One attempt asks the index what it has, diffs that against the
//! target, searches the index with the changed paths masked out, and hands
//! the changed paths back for an unindexed scan. Every index result carries
//! the commit it was served from; a single mismatching result means the
//! index rotated mid-search and the attempt is discarded. That per-result
//! version check is the linearization point of the whole protocol.

use crate::backends::{
    FileStatus, GitRemote, IndexClient, IndexFileMatch, IndexSearchOptions, IndexSender,
};
use crate::config::Settings;
use crate::error::ServiceError;
use crate::pattern::IndexQuery;
use crate::protocol::{FileMatch, SearchRequest};
use crate::services::stream::MatchSink;
use crate::types::CommitOid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Retry budget for the reconciliation loop.
pub const MAX_ATTEMPTS: usize = 5;

/// Outcome of a hybrid search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HybridDecision {
    /// The index portion has been streamed; only these paths still need an
    /// unindexed scan against the target commit. May be empty.
    Partial { unindexed: Vec<String> },
    /// The index cannot be trusted for this request; scan the whole commit.
    Fallback { reason: &'static str },
}

enum Attempt {
    Done(Vec<String>),
    Fallback(&'static str),
    Retry(&'static str),
}

/// Coordinates indexed search against an exact target commit.
pub struct HybridService {
    index: Arc<dyn IndexClient>,
    git: Arc<dyn GitRemote>,
    max_total_paths_length: usize,
}

impl HybridService {
    #[must_use]
    pub fn new(index: Arc<dyn IndexClient>, git: Arc<dyn GitRemote>, settings: &Settings) -> Self {
        Self {
            index,
            git,
            max_total_paths_length: settings.max_total_paths_length,
        }
    }

    /// Runs the bounded retry loop.
    ///
    /// A request cancellation at any step returns an empty `Partial`: the
    /// stream is winding down anyway and the caller treats it as success.
    ///
    /// # Errors
    ///
    /// Index list/search failures and diff failures are surfaced as-is;
    /// they are not retried here.
    pub async fn search(
        &self,
        req: &SearchRequest,
        target: &CommitOid,
        query: &IndexQuery,
        sink: &MatchSink,
        cancel: &CancellationToken,
    ) -> Result<HybridDecision, ServiceError> {
        for attempt in 1..=MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Ok(HybridDecision::Partial { unindexed: Vec::new() });
            }
            match self.attempt(req, target, query, sink, cancel).await? {
                Attempt::Done(unindexed) => {
                    tracing::debug!(attempt, unindexed = unindexed.len(), "hybrid search done");
                    return Ok(HybridDecision::Partial { unindexed });
                }
                Attempt::Fallback(reason) => {
                    tracing::info!(attempt, reason, "hybrid fallback");
                    return Ok(HybridDecision::Fallback { reason });
                }
                Attempt::Retry(reason) => {
                    tracing::info!(attempt, reason, "hybrid retry");
                }
            }
        }
        Ok(HybridDecision::Fallback {
            reason: "retries-exhausted",
        })
    }

    async fn attempt(
        &self,
        req: &SearchRequest,
        target: &CommitOid,
        query: &IndexQuery,
        sink: &MatchSink,
        cancel: &CancellationToken,
    ) -> Result<Attempt, ServiceError> {
        // ListIndexed
        let Some(indexed) = self.index.list(req.repo_id).await? else {
            return Ok(Attempt::Fallback("no-indexed-commit"));
        };
        if cancel.is_cancelled() {
            return Ok(Attempt::Done(Vec::new()));
        }

        // DiffPaths
        let (indexed_ignore, unindexed_search) = if indexed == *target {
            (Vec::new(), Vec::new())
        } else {
            let changes = self
                .git
                .changed_files(&req.repo, &indexed, target)
                .await?;
            let mut ignore = Vec::new();
            let mut search = Vec::new();
            let mut total_len = 0usize;
            for change in changes {
                total_len += change.path.len();
                match change.status {
                    // Not trustworthy in the index; must be rescanned
                    FileStatus::Modified => {
                        ignore.push(change.path.clone());
                        search.push(change.path);
                    }
                    // Only exists at the target commit
                    FileStatus::Added => search.push(change.path),
                    // Only existed at the indexed commit
                    FileStatus::Deleted => ignore.push(change.path),
                }
            }
            if total_len > self.max_total_paths_length {
                return Ok(Attempt::Fallback("diff-too-large"));
            }
            (ignore, search)
        };
        if cancel.is_cancelled() {
            return Ok(Attempt::Done(Vec::new()));
        }

        // Search, with every result checked against the indexed commit
        let masked = query.clone().excluding_paths(indexed_ignore);
        let stream_cancel = cancel.child_token();
        let sender = VersionCheckedSender {
            expect: indexed.as_str().to_string(),
            sink,
            stream_cancel: stream_cancel.clone(),
            mismatch: AtomicBool::new(false),
            sent_any: AtomicBool::new(false),
        };
        let opts = IndexSearchOptions {
            max_matches: req.pattern_info.limit,
        };
        let stats = self
            .index
            .stream_search(&masked, &opts, &stream_cancel, &sender)
            .await?;

        if sender.mismatch.load(Ordering::SeqCst) {
            return Ok(Attempt::Retry("index-search-changed"));
        }
        if stats.crashes > 0 {
            return Ok(Attempt::Retry("backend-crashed"));
        }

        // Verify: an empty result set proves nothing; make sure the index
        // did not rotate under us between list and search
        if !sender.sent_any.load(Ordering::SeqCst) {
            let now = self.index.list(req.repo_id).await?;
            if now.as_ref() != Some(&indexed) {
                return Ok(Attempt::Retry("index-list-changed"));
            }
        }

        Ok(Attempt::Done(unindexed_search))
    }
}

/// Streams index results into the match sink, discarding the attempt on the
/// first result whose commit version differs from the expected one.
struct VersionCheckedSender<'a> {
    expect: String,
    sink: &'a MatchSink,
    stream_cancel: CancellationToken,
    mismatch: AtomicBool,
    sent_any: AtomicBool,
}

impl IndexSender for VersionCheckedSender<'_> {
    fn send(&self, batch: Vec<IndexFileMatch>) {
        if self.mismatch.load(Ordering::SeqCst) {
            return;
        }
        for m in batch {
            if m.version != self.expect {
                // The index rotated mid-search; nothing from this stream can
                // be trusted any further
                self.mismatch.store(true, Ordering::SeqCst);
                self.stream_cancel.cancel();
                return;
            }
            self.sent_any.store(true, Ordering::SeqCst);
            self.sink.send(FileMatch {
                path: m.path,
                chunk_matches: m.chunk_matches,
                language: m.language,
                path_matches: false,
            });
        }
    }
}
