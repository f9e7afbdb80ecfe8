//! The match stream: a bounded, cancellable sink.
//!
//! Both the index-result adapter and the unindexed scanner feed the same
//! sink. One mutex covers the counter and the outbound write together, so a
//! file's chunks always reach the caller contiguously and the count can
//! never drift from what was actually sent. Reaching the limit fires the
//! per-request cancellation token; that token is the pipeline's only
//! back-pressure mechanism.

use crate::protocol::FileMatch;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Outbound delivery capability. Called under the sink's mutex; keep it
/// cheap (serialize and hand off, don't block on the network).
pub type OnMatch = Box<dyn Fn(FileMatch) + Send + Sync>;

/// Per-request match sink with a range-count limit.
pub struct MatchSink {
    on_match: OnMatch,
    /// Effective limit; a requested limit of 0 means unbounded.
    limit: u64,
    sent: Mutex<u64>,
    limit_hit: AtomicBool,
    cancel: CancellationToken,
}

impl MatchSink {
    /// `cancel` fires once the limit is reached; pass the request's root
    /// token (or a child of it) so downstream workers stop promptly.
    #[must_use]
    pub fn new(limit: u64, cancel: CancellationToken, on_match: OnMatch) -> Self {
        Self {
            on_match,
            limit: if limit == 0 { u64::MAX } else { limit },
            sent: Mutex::new(0),
            limit_hit: AtomicBool::new(false),
            cancel,
        }
    }

    /// Sends one file match, trimming it to the remaining budget.
    ///
    /// Atomic with respect to the counter: concurrent sends interleave at
    /// file granularity only. Sends after the limit is reached are dropped
    /// silently.
    pub fn send(&self, mut m: FileMatch) {
        let mut sent = self.sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if *sent >= self.limit {
            self.limit_hit.store(true, Ordering::Relaxed);
            return;
        }
        let count = m.match_count();
        let remaining = self.limit - *sent;
        let kept = if count > remaining {
            // Partial delivery is evidence there was more than the limit
            self.limit_hit.store(true, Ordering::Relaxed);
            m.trim_to(remaining)
        } else {
            count
        };
        if kept == 0 {
            return;
        }
        *sent += kept;
        (self.on_match)(m);
        if *sent >= self.limit {
            self.cancel.cancel();
        }
    }

    /// True iff the producers would have emitted more than the limit.
    #[must_use]
    pub fn limit_hit(&self) -> bool {
        self.limit_hit.load(Ordering::Relaxed)
    }

    /// Match ranges delivered so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        *self.sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
