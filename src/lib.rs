//! snapgrep: hybrid indexed/unindexed code search with commit-exact
//! consistency.
//!
//! This library is the core of a code-search back end. For each request it
//! reconciles a repository's *indexed* snapshot (served by an external index
//! engine) with the *exact commit* the caller asked for, and streams a
//! consistent set of file/chunk matches as if the entire commit had been
//! scanned:
//! - An archive store caches each commit's working tree on disk, with
//!   single-flighted fetches and LRU + age eviction
//! - A pattern compiler produces a match tree for local scanning and an
//!   equivalent index-engine query
//! - A parallel scanner searches only the paths the index cannot vouch for
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              SearchService                    │
//! │   validate → compile → stream one DoneEvent   │
//! └───────┬───────────────────────┬──────────────┘
//!         │                       │
//! ┌───────▼────────┐      ┌───────▼────────┐
//! │ HybridService  │      │  ScanService   │
//! │ retry loop,    │      │ rayon workers, │
//! │ version checks │      │ chunk assembly │
//! └───┬───────┬────┘      └───────┬────────┘
//!     │       │                   │
//! ┌───▼──┐ ┌──▼───────┐   ┌───────▼────────┐
//! │Index │ │GitRemote │   │  ArchiveStore  │
//! │engine│ │ (tar +   │◄──┤ single-flight, │
//! │      │ │  diffs)  │   │ sqlite sidecar │
//! └──────┘ └──────────┘   └────────────────┘
//! ```
//!
//! Matches from both the index engine and the local scanner flow through
//! one bounded [`MatchSink`](services::MatchSink); reaching the limit fires
//! the request's cancellation token, which is the pipeline's only
//! back-pressure mechanism.

pub mod backends;
pub mod config;
pub mod error;
pub mod lang;
pub mod pattern;
pub mod protocol;
pub mod services;
pub mod store;
pub mod types;

pub use config::Settings;
pub use error::{ErrorKind, Result, ServiceError};
pub use services::SearchService;
pub use types::{ArchiveKey, CommitOid, RepoId};
