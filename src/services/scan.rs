//! The unindexed searcher: parallel scan of archive entries.
//!
//! Workers pull from the archive's deterministic entry list (or a caller
//! subset in hybrid mode), apply path and language filters, evaluate the
//! match tree over file bytes, and push assembled matches into the
//! [`MatchSink`]. Cancellation is observed between files; a limit-cancel is
//! a normal exit, not an error.

use crate::error::ServiceError;
use crate::lang;
use crate::pattern::{CompiledPattern, MatchTree};
use crate::protocol::{FileMatch, PatternInfo};
use crate::services::chunk;
use crate::services::stream::MatchSink;
use crate::store::{ArchiveHandle, ManifestEntry};
use ahash::AHashSet;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

/// How many leading bytes to inspect for the binary heuristic.
const BINARY_SNIFF_BYTES: usize = 1024;

/// Configuration for the scan worker pool.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Worker thread count (0 = number of CPUs).
    pub workers: usize,
    /// Context lines on each side of a chunk.
    pub context_lines: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            context_lines: 0,
        }
    }
}

/// Per-request scan inputs beyond the compiled pattern.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub matches_content: bool,
    pub matches_path: bool,
    /// Scan only these paths (hybrid "changed paths only" mode).
    pub subset: Option<AHashSet<String>>,
    pub include_langs: Vec<String>,
    pub exclude_langs: Vec<String>,
}

impl ScanOptions {
    #[must_use]
    pub fn from_pattern(info: &PatternInfo) -> Self {
        Self {
            matches_content: info.matches_content(),
            matches_path: info.matches_path(),
            subset: None,
            include_langs: info.include_langs.clone(),
            exclude_langs: info.exclude_langs.clone(),
        }
    }
}

/// Parallel archive scanner with a dedicated worker pool.
pub struct ScanService {
    pool: rayon::ThreadPool,
    context_lines: usize,
}

// Early-exit marker for cancellation; surfaces as a clean stop, not an error.
struct ScanStop;

impl ScanService {
    /// Builds the worker pool.
    ///
    /// # Errors
    ///
    /// Returns an IO-classified error when the thread pool cannot be built.
    pub fn new(config: &ScanConfig) -> Result<Self, ServiceError> {
        let workers = if config.workers > 0 {
            config.workers
        } else {
            std::thread::available_parallelism().map_or(4, |n| n.get())
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("snapgrep-scan-{i}"))
            .build()
            .map_err(|e| ServiceError::Io(std::io::Error::other(e)))?;
        Ok(Self {
            pool,
            context_lines: config.context_lines,
        })
    }

    /// Scans the archive, sending matches to `sink` until the candidate list
    /// is exhausted or `cancel` fires.
    ///
    /// Unreadable entries are logged and skipped: a half-served search is
    /// worth more than none, and the store's manifest is the source of truth
    /// for what should have been there.
    ///
    /// # Errors
    ///
    /// Currently infallible at the search level; the signature leaves room
    /// for the caller's `?` chain.
    pub fn search(
        &self,
        archive: &ArchiveHandle,
        pattern: &CompiledPattern,
        opts: &ScanOptions,
        sink: &MatchSink,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let candidates: Vec<&ManifestEntry> = archive
            .entries()
            .iter()
            .filter(|e| match &opts.subset {
                Some(subset) => subset.contains(&e.path),
                None => true,
            })
            .collect();

        tracing::debug!(
            key = %archive.key(),
            candidates = candidates.len(),
            subset = opts.subset.is_some(),
            "scanning archive"
        );

        let outcome = self.pool.install(|| {
            candidates
                .par_iter()
                .try_for_each_init(Vec::new, |buf, entry| {
                    if cancel.is_cancelled() {
                        return Err(ScanStop);
                    }
                    self.scan_file(archive, pattern, opts, sink, entry, buf);
                    Ok(())
                })
        });
        // A cancellation stop is a normal exit
        let _ = outcome;
        Ok(())
    }

    fn scan_file(
        &self,
        archive: &ArchiveHandle,
        pattern: &CompiledPattern,
        opts: &ScanOptions,
        sink: &MatchSink,
        entry: &ManifestEntry,
        buf: &mut Vec<u8>,
    ) {
        let path = entry.path.as_str();
        if !pattern.paths.matches(path) {
            return;
        }
        let language = lang::detect(path);
        if !lang::passes_filters(language, &opts.include_langs, &opts.exclude_langs) {
            return;
        }

        let path_matches = opts.matches_path && pattern.tree.matches_path(path.as_bytes());

        let mut content_match = false;
        let mut chunks = Vec::new();
        if opts.matches_content {
            if matches!(pattern.tree, MatchTree::All) {
                // Path-only filtering; no bytes needed
                content_match = true;
            } else if entry.size == 0 {
                content_match = pattern.tree.evaluate(path.as_bytes(), b"").is_some();
            } else {
                match archive.read_into(path, buf) {
                    Ok(_) => {
                        if !is_binary(buf) {
                            if let Some(ranges) = pattern.tree.evaluate(path.as_bytes(), buf) {
                                content_match = true;
                                chunks = chunk::build_chunks(buf, &ranges, self.context_lines);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path, error = %e, "skipping unreadable archive entry");
                        return;
                    }
                }
            }
        }

        if !content_match && !path_matches {
            return;
        }
        sink.send(FileMatch {
            path: path.to_string(),
            chunk_matches: chunks,
            language: language.map(str::to_string),
            path_matches,
        });
    }
}

/// Leading-NUL heuristic: matches what git and grep consider binary.
fn is_binary(content: &[u8]) -> bool {
    let sniff = &content[..content.len().min(BINARY_SNIFF_BYTES)];
    memchr::memchr(0, sniff).is_some()
}
