//! Path include/exclude filters.
//!
//! Includes are AND-matched (a path must satisfy every one); the exclude is
//! a single pattern. Filters arrive as regexps or as globs depending on a
//! request flag; globs are converted to their equivalent regexp form before
//! compilation so matching has one code path.

use crate::error::PatternError;
use globset::GlobBuilder;
use regex::bytes::Regex;

/// Compiled path filters for one request.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    includes: Vec<Regex>,
    include_sources: Vec<String>,
    exclude: Option<Regex>,
    exclude_source: Option<String>,
}

// Equality by the compiled sources; Regex has no useful Eq of its own.
impl PartialEq for PathMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.include_sources == other.include_sources
            && self.exclude_source == other.exclude_source
    }
}

impl PathMatcher {
    /// Compiles include/exclude filters.
    ///
    /// An empty `exclude` disables exclusion. With `patterns_are_regexps`
    /// unset, filters are treated as globs (`*.go` style) and converted.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::Glob`] or [`PatternError::PathRegexp`] naming
    /// the offending filter.
    pub fn compile(
        includes: &[String],
        exclude: &str,
        patterns_are_regexps: bool,
    ) -> Result<Self, PatternError> {
        let mut compiled = Vec::with_capacity(includes.len());
        let mut include_sources = Vec::with_capacity(includes.len());
        for raw in includes {
            let source = to_regex_source(raw, patterns_are_regexps)?;
            compiled.push(compile_regex(&source, raw)?);
            include_sources.push(source);
        }

        let (exclude_re, exclude_source) = if exclude.is_empty() {
            (None, None)
        } else {
            let source = to_regex_source(exclude, patterns_are_regexps)?;
            (Some(compile_regex(&source, exclude)?), Some(source))
        };

        Ok(Self {
            includes: compiled,
            include_sources,
            exclude: exclude_re,
            exclude_source,
        })
    }

    /// A matcher that admits every path.
    #[must_use]
    pub fn match_all() -> Self {
        Self {
            includes: Vec::new(),
            include_sources: Vec::new(),
            exclude: None,
            exclude_source: None,
        }
    }

    /// True iff the path satisfies every include and fails the exclude.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let bytes = path.as_bytes();
        if !self.includes.iter().all(|re| re.is_match(bytes)) {
            return false;
        }
        match &self.exclude {
            Some(re) => !re.is_match(bytes),
            None => true,
        }
    }

    /// True when no filter is configured at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.exclude.is_none()
    }
}

/// Regexp source for a filter, converting from glob form when needed.
pub(super) fn to_regex_source(raw: &str, is_regexp: bool) -> Result<String, PatternError> {
    if is_regexp {
        return Ok(raw.to_string());
    }
    let glob = GlobBuilder::new(raw)
        .build()
        .map_err(|e| PatternError::Glob {
            glob: raw.to_string(),
            reason: e.to_string(),
        })?;
    Ok(glob.regex().to_string())
}

fn compile_regex(source: &str, original: &str) -> Result<Regex, PatternError> {
    Regex::new(source).map_err(|e| PatternError::PathRegexp {
        pattern: original.to_string(),
        reason: e.to_string(),
    })
}
