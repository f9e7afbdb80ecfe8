//! Pattern compilation.
//!
//! Turns a wire-level [`PatternInfo`](crate::protocol::PatternInfo) into the
//! two artifacts the engines consume: a [`MatchTree`] evaluated over local
//! file bytes and paths, and an [`IndexQuery`] with equivalent semantics for
//! the index engine. Path include/exclude filters compile separately into a
//! [`PathMatcher`]. All three are pure functions of their input.

mod paths;
mod query;
mod tree;

pub use paths::PathMatcher;
pub use query::{build_index_query, IndexQuery};
pub use tree::{MatchTree, Scope};

use crate::error::PatternError;
use crate::protocol::PatternInfo;
use crate::types::RepoId;

/// Everything the engines need, compiled once per request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPattern {
    pub tree: MatchTree,
    pub paths: PathMatcher,
    pub index_query: IndexQuery,
}

/// Compiles a full pattern specification.
///
/// # Errors
///
/// Returns [`PatternError`] (a bad-request classification) for invalid or
/// unsupported regex syntax and malformed path filters.
pub fn compile(info: &PatternInfo, repo: RepoId) -> Result<CompiledPattern, PatternError> {
    let tree = tree::compile(info)?;
    let paths = PathMatcher::compile(
        &info.include_patterns,
        &info.exclude_pattern,
        info.path_patterns_are_regexps,
    )?;
    let index_query = build_index_query(info, repo)?;
    Ok(CompiledPattern {
        tree,
        paths,
        index_query,
    })
}
