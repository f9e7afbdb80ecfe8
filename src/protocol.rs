//! Wire-level request and response model.
//!
//! These types mirror what a transport layer would decode from the caller
//! and encode back: a [`SearchRequest`] in, a stream of [`FileMatch`]es out,
//! terminated by exactly one [`DoneEvent`]. Field names serialize in
//! camelCase to match the service's JSON surface.

use crate::error::ServiceError;
use crate::types::{CommitOid, RepoId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default archive fetch timeout when the caller does not supply one.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(500);

fn default_true() -> bool {
    true
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_millis() as u64
}

/// One inbound search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Repository name, e.g. `github.com/org/repo`.
    pub repo: String,
    /// Repository id as known to the index engine.
    pub repo_id: RepoId,
    /// Absolute 40-hex commit to search.
    pub commit: String,
    /// Opaque URL the caller associates with the repo; not interpreted.
    #[serde(default)]
    pub url: String,
    pub pattern_info: PatternInfo,
    /// Budget for acquiring the commit archive, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Overall request deadline, in milliseconds. Absent means no deadline
    /// beyond the caller's own disconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub features: Features,
}

impl SearchRequest {
    /// Validates the request and returns the parsed commit id.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] for an empty repo, a
    /// non-absolute commit, or a negated structural pattern. Pattern and
    /// path-filter compilation errors surface later, from the compiler,
    /// with the same bad-request classification.
    pub fn validate(&self) -> Result<CommitOid, ServiceError> {
        if self.repo.is_empty() {
            return Err(ServiceError::Validation("repo must be non-empty".into()));
        }
        let commit = CommitOid::parse(&self.commit).map_err(ServiceError::Validation)?;
        self.pattern_info.validate()?;
        Ok(commit)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Per-request feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    /// Attempt index reconciliation before falling back to a full scan.
    #[serde(default = "default_true")]
    pub hybrid: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self { hybrid: true }
    }
}

/// What the caller wants matched, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternInfo {
    /// The pattern expression tree.
    pub query: QueryNode,
    /// Structural ("comby") search is delegated to an external engine and
    /// not handled by this core.
    #[serde(default)]
    pub is_structural: bool,
    #[serde(default)]
    pub is_case_sensitive: bool,
    /// Path filters; a path must match every include.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Single exclude filter; an empty string disables it.
    #[serde(default)]
    pub exclude_pattern: String,
    /// When false, include/exclude are globs rather than regexps.
    #[serde(default)]
    pub path_patterns_are_regexps: bool,
    #[serde(default = "default_true")]
    pub pattern_matches_content: bool,
    #[serde(default)]
    pub pattern_matches_path: bool,
    #[serde(default)]
    pub include_langs: Vec<String>,
    #[serde(default)]
    pub exclude_langs: Vec<String>,
    /// Maximum number of match ranges to stream; 0 means effectively
    /// unbounded.
    #[serde(default)]
    pub limit: u64,
}

impl PatternInfo {
    /// A minimal pattern info for a single pattern string.
    #[must_use]
    pub fn literal(value: &str) -> Self {
        Self {
            query: QueryNode::Pattern(PatternNode::literal(value)),
            is_structural: false,
            is_case_sensitive: false,
            include_patterns: Vec::new(),
            exclude_pattern: String::new(),
            path_patterns_are_regexps: false,
            pattern_matches_content: true,
            pattern_matches_path: false,
            include_langs: Vec::new(),
            exclude_langs: Vec::new(),
            limit: 0,
        }
    }

    /// Scope normalization: when neither flag is set the pattern matches
    /// content.
    #[must_use]
    pub fn matches_content(&self) -> bool {
        self.pattern_matches_content || !self.pattern_matches_path
    }

    #[must_use]
    pub fn matches_path(&self) -> bool {
        self.pattern_matches_path
    }

    pub(crate) fn validate(&self) -> Result<(), ServiceError> {
        if self.is_structural {
            if self.query.has_negation() {
                return Err(ServiceError::Validation(
                    "the index does not support negated structural patterns".into(),
                ));
            }
            return Err(ServiceError::Validation(
                "structural search is delegated to an external engine".into(),
            ));
        }
        Ok(())
    }
}

/// The pattern expression tree sent by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryNode {
    Pattern(PatternNode),
    And { children: Vec<QueryNode> },
    Or { children: Vec<QueryNode> },
}

impl QueryNode {
    #[must_use]
    pub fn has_negation(&self) -> bool {
        match self {
            Self::Pattern(p) => p.is_negated,
            Self::And { children } | Self::Or { children } => {
                children.iter().any(QueryNode::has_negation)
            }
        }
    }
}

/// A single pattern leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternNode {
    /// The pattern text. Empty means "match everything" (path-only filter).
    pub value: String,
    #[serde(default)]
    pub is_negated: bool,
    /// When false, `value` is a literal and is escaped before compilation.
    #[serde(default)]
    pub is_regexp: bool,
    /// Surround with word boundaries.
    #[serde(default)]
    pub is_word_match: bool,
}

impl PatternNode {
    #[must_use]
    pub fn literal(value: &str) -> Self {
        Self {
            value: value.to_string(),
            is_negated: false,
            is_regexp: false,
            is_word_match: false,
        }
    }

    #[must_use]
    pub fn regexp(value: &str) -> Self {
        Self {
            value: value.to_string(),
            is_negated: false,
            is_regexp: true,
            is_word_match: false,
        }
    }
}

/// A position inside a file.
///
/// `offset` is a byte offset from the start of the file; `line` is a 0-based
/// newline count; `column` is a 0-based count of UTF-8 code points from the
/// start of the line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub offset: u64,
    pub line: u64,
    pub column: u64,
}

/// A half-open `[start, end)` match range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRange {
    pub start: Location,
    pub end: Location,
}

/// A contiguous line-aligned slice of a file containing one or more match
/// ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMatch {
    /// The chunk's text, starting at `content_start`.
    pub content: String,
    /// Location of the first byte of the first line included in `content`.
    pub content_start: Location,
    /// Ranges within the chunk, ascending by start offset. Offsets are
    /// absolute file offsets.
    pub ranges: Vec<MatchRange>,
}

/// One matching file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMatch {
    pub path: String,
    #[serde(default)]
    pub chunk_matches: Vec<ChunkMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// True when the pattern matched the path itself.
    #[serde(default)]
    pub path_matches: bool,
}

impl FileMatch {
    /// Number of match ranges this result counts for against the limit.
    /// A path-only match counts one.
    #[must_use]
    pub fn match_count(&self) -> u64 {
        let ranges: usize = self.chunk_matches.iter().map(|c| c.ranges.len()).sum();
        if ranges == 0 {
            1
        } else {
            ranges as u64
        }
    }

    /// Trims trailing ranges (and then-empty chunks) so at most `budget`
    /// ranges remain. Returns the number of ranges kept.
    pub fn trim_to(&mut self, budget: u64) -> u64 {
        if self.chunk_matches.is_empty() {
            // Path-only matches are atomic.
            return u64::from(budget >= 1);
        }
        let mut kept: u64 = 0;
        let mut keep_chunks = 0;
        for chunk in &mut self.chunk_matches {
            let remaining = budget - kept;
            if remaining == 0 {
                break;
            }
            if chunk.ranges.len() as u64 > remaining {
                chunk.ranges.truncate(remaining as usize);
            }
            kept += chunk.ranges.len() as u64;
            keep_chunks += 1;
        }
        self.chunk_matches.truncate(keep_chunks);
        kept
    }
}

/// Terminal stream event; sent exactly once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneEvent {
    pub limit_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
