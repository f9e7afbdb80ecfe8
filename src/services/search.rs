//! The per-request orchestrator.
//!
//! Owns the whole pipeline for one search call: validation, pattern
//! compilation, the match sink, the hybrid decision, archive acquisition,
//! and the blocking scan. Whatever happens, an opened stream terminates
//! with exactly one [`DoneEvent`].

use crate::backends::{GitRemote, IndexClient};
use crate::config::Settings;
use crate::error::{ErrorKind, ServiceError};
use crate::pattern::{self, CompiledPattern};
use crate::protocol::{DoneEvent, SearchRequest};
use crate::services::hybrid::{HybridDecision, HybridService};
use crate::services::scan::{ScanConfig, ScanOptions, ScanService};
use crate::services::stream::{MatchSink, OnMatch};
use crate::store::{ArchiveStore, PrepareOpts};
use crate::types::{ArchiveKey, CommitOid};
use ahash::AHashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The search service: one instance per process, cheap to share.
pub struct SearchService {
    store: ArchiveStore,
    hybrid: HybridService,
    scan: Arc<ScanService>,
    settings: Settings,
}

impl SearchService {
    /// Wires the pipeline together.
    ///
    /// # Errors
    ///
    /// Fails when the scan worker pool cannot be built.
    pub fn new(
        store: ArchiveStore,
        index: Arc<dyn IndexClient>,
        git: Arc<dyn GitRemote>,
        settings: Settings,
    ) -> Result<Self, ServiceError> {
        let scan = ScanService::new(&ScanConfig {
            workers: settings.file_parallelism,
            context_lines: settings.context_lines,
        })?;
        Ok(Self {
            store,
            hybrid: HybridService::new(index, Arc::clone(&git), &settings),
            scan: Arc::new(scan),
            settings,
        })
    }

    /// Runs one request to completion, delivering matches through
    /// `on_match` and returning the terminal [`DoneEvent`].
    ///
    /// The done event's `error` is populated only for fatal, timeout, or
    /// retries-exhausted-temporary outcomes; a limit-cancel is success with
    /// `limit_hit` set.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for validation failures, before any match could
    /// have been streamed; the transport maps those to a bad-request status.
    pub async fn run(&self, req: &SearchRequest, on_match: OnMatch) -> Result<DoneEvent, ServiceError> {
        let commit = req.validate()?;
        let compiled =
            pattern::compile(&req.pattern_info, req.repo_id).map_err(ServiceError::Pattern)?;

        let cancel = CancellationToken::new();
        let sink = Arc::new(MatchSink::new(
            req.pattern_info.limit,
            cancel.clone(),
            on_match,
        ));

        let pipeline = self.run_pipeline(req, &commit, &compiled, &sink, &cancel);
        let outcome = match req.deadline() {
            Some(deadline) => tokio::time::timeout(deadline, pipeline)
                .await
                .unwrap_or(Err(ServiceError::DeadlineExceeded)),
            None => pipeline.await,
        };

        let done = match outcome {
            Ok(()) => DoneEvent {
                limit_hit: sink.limit_hit(),
                error: None,
            },
            Err(e) => match e.kind() {
                ErrorKind::Canceled => DoneEvent {
                    limit_hit: sink.limit_hit(),
                    error: None,
                },
                ErrorKind::Validation => return Err(e),
                _ => {
                    tracing::warn!(code = e.code(), error = %e, "search failed");
                    DoneEvent {
                        limit_hit: sink.limit_hit(),
                        error: Some(e.to_string()),
                    }
                }
            },
        };
        tracing::debug!(
            repo = %req.repo,
            sent = sink.sent(),
            limit_hit = done.limit_hit,
            "search finished"
        );
        Ok(done)
    }

    async fn run_pipeline(
        &self,
        req: &SearchRequest,
        commit: &CommitOid,
        compiled: &CompiledPattern,
        sink: &Arc<MatchSink>,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let mut subset: Option<Vec<String>> = None;
        if self.settings.hybrid_enabled && req.features.hybrid {
            match self
                .hybrid
                .search(req, commit, &compiled.index_query, sink, cancel)
                .await?
            {
                HybridDecision::Partial { unindexed } => {
                    if unindexed.is_empty() {
                        // The index covered the whole request
                        return Ok(());
                    }
                    subset = Some(unindexed);
                }
                HybridDecision::Fallback { reason } => {
                    tracing::debug!(reason, "scanning full commit");
                }
            }
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let key = ArchiveKey::new(req.repo.clone(), commit.clone());
        let opts = PrepareOpts {
            fetch_timeout: req.fetch_timeout(),
            paths: subset.clone(),
            ignore: None,
        };
        let archive = self
            .store
            .prepare(&key, &opts, cancel)
            .await
            .map_err(|e| match e {
                crate::error::StoreError::Canceled => ServiceError::Canceled,
                other => ServiceError::Store(other),
            })?;

        let mut scan_opts = ScanOptions::from_pattern(&req.pattern_info);
        scan_opts.subset = subset.map(|paths| paths.into_iter().collect::<AHashSet<_>>());

        let scan = Arc::clone(&self.scan);
        let compiled = compiled.clone();
        let sink = Arc::clone(sink);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            scan.search(&archive, &compiled, &scan_opts, &sink, &cancel)
        })
        .await
        .map_err(|e| ServiceError::Io(std::io::Error::other(e)))??;

        Ok(())
    }
}
