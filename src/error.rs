//! Error types for snapgrep.
//!
//! Uses thiserror for ergonomic error handling with proper
//! error chain propagation. Every error maps onto one of five kinds
//! ([`ErrorKind`]); the hybrid coordinator is the only place that turns
//! "temporary" into a retry, everything else just classifies.

use std::time::Duration;
use thiserror::Error;

/// Outcome classification for a failed operation.
///
/// The transport layer maps these onto statuses: `Validation` is a bad
/// request, `Canceled` is not an error to the caller, `DeadlineExceeded` is a
/// timeout, `Temporary` may be retried upstream, `Fatal` is returned verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Temporary,
    Canceled,
    DeadlineExceeded,
    Fatal,
}

/// Top-level service error.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("bad request: {0}")]
    Validation(String),

    #[error("pattern error: {0}")]
    Pattern(#[from] PatternError),

    #[error("archive store error: {0}")]
    Store(#[from] StoreError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ServiceError {
    /// Classifies this error per the service taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Pattern(_) => ErrorKind::Validation,
            Self::Store(e) => e.kind(),
            Self::Backend(e) => {
                if e.is_temporary() {
                    ErrorKind::Temporary
                } else {
                    ErrorKind::Fatal
                }
            }
            Self::Io(_) => ErrorKind::Fatal,
            Self::Canceled => ErrorKind::Canceled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }

    /// True when a retry against the same inputs could succeed.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.kind() == ErrorKind::Temporary
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "BAD_REQUEST",
            Self::Pattern(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Backend(e) => e.code(),
            Self::Io(_) => "IO_ERROR",
            Self::Canceled => "CANCELED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }
}

/// Pattern compilation errors. All of these are the caller's fault.
#[derive(Error, Debug, Clone)]
pub enum PatternError {
    #[error("invalid regex pattern: {0}")]
    Syntax(String),

    #[error("unsupported pattern feature: {0}")]
    Unsupported(String),

    #[error("invalid path glob {glob:?}: {reason}")]
    Glob { glob: String, reason: String },

    #[error("invalid path regexp {pattern:?}: {reason}")]
    PathRegexp { pattern: String, reason: String },
}

impl PatternError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Syntax(_) => "INVALID_PATTERN",
            Self::Unsupported(_) => "UNSUPPORTED_PATTERN",
            Self::Glob { .. } => "INVALID_GLOB",
            Self::PathRegexp { .. } => "INVALID_PATH_REGEXP",
        }
    }
}

/// Archive store errors.
///
/// Clone is required because a single fetch failure is broadcast to every
/// caller waiting on the same in-flight key; variants therefore carry owned
/// strings instead of source errors where the source is not Clone.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("tar archive corrupt: {0}")]
    TarHeader(String),

    #[error("archive fetch failed: {0}")]
    Fetch(#[source] BackendError),

    #[error("archive fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("cache metadata error: {0}")]
    Meta(String),

    #[error("store configuration error: {0}")]
    Config(String),

    #[error("archive IO error: {0}")]
    Io(String),

    #[error("archive fetch canceled")]
    Canceled,
}

impl StoreError {
    /// Classifies this error per the service taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            // A corrupt tar usually means the revision was still being
            // streamed or the connection dropped mid-archive; retriable.
            Self::TarHeader(_) | Self::FetchTimeout(_) => ErrorKind::Temporary,
            Self::Fetch(e) => {
                if e.is_temporary() {
                    ErrorKind::Temporary
                } else {
                    ErrorKind::Fatal
                }
            }
            Self::Meta(_) | Self::Config(_) | Self::Io(_) => ErrorKind::Fatal,
            Self::Canceled => ErrorKind::Canceled,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TarHeader(_) => "TAR_CORRUPT",
            Self::Fetch(e) => e.code(),
            Self::FetchTimeout(_) => "FETCH_TIMEOUT",
            Self::Meta(_) => "CACHE_META_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "ARCHIVE_IO_ERROR",
            Self::Canceled => "FETCH_CANCELED",
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<MetaError> for StoreError {
    fn from(err: MetaError) -> Self {
        Self::Meta(err.to_string())
    }
}

/// Errors reported by the external collaborators (index engine, git server).
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("revision {commit} not found in {repo} (clone may be in progress)")]
    RevisionNotFound { repo: String, commit: String },

    #[error("{0}")]
    Internal(String),
}

impl BackendError {
    /// Connection drops and not-yet-cloned revisions resolve on retry.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::RevisionNotFound { .. })
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "BACKEND_CONNECTION",
            Self::RevisionNotFound { .. } => "REVISION_NOT_FOUND",
            Self::Internal(_) => "BACKEND_ERROR",
        }
    }
}

/// Cache metadata database errors (internal to the store).
#[derive(Error, Debug)]
pub enum MetaError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Result type alias for archive store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for cache metadata operations.
pub type MetaResult<T> = std::result::Result<T, MetaError>;
