//! The match tree: a tagged-variant expression evaluated over file bytes
//! and paths.
//!
//! Leaf regexes compile through ripgrep's `grep-regex` so matching behavior
//! (byte-oriented, multi-line aware) is identical to the scan engine's.
//! Pattern text is pre-parsed with `regex-syntax` so unsupported constructs
//! surface as a caller-visible bad request instead of an opaque build error.

use crate::error::PatternError;
use crate::protocol::{PatternInfo, PatternNode, QueryNode};
use grep_matcher::Matcher;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use std::fmt;
use std::ops::Range;

/// Where a leaf pattern applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Content,
    FileName,
    Both,
}

impl Scope {
    fn covers_content(self) -> bool {
        matches!(self, Self::Content | Self::Both)
    }

    fn covers_path(self) -> bool {
        matches!(self, Self::FileName | Self::Both)
    }
}

/// A compiled leaf regex.
#[derive(Clone)]
pub struct RegexLeaf {
    matcher: RegexMatcher,
    /// Final regex text after literal escaping and word-boundary wrapping.
    source: String,
    scope: Scope,
    case_sensitive: bool,
}

impl fmt::Debug for RegexLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexLeaf")
            .field("source", &self.source)
            .field("scope", &self.scope)
            .field("case_sensitive", &self.case_sensitive)
            .finish()
    }
}

// Compiled matchers have no identity of their own; two leaves are equal when
// they were built from the same inputs.
impl PartialEq for RegexLeaf {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.scope == other.scope
            && self.case_sensitive == other.case_sensitive
    }
}

/// The match tree over file bytes and paths.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchTree {
    /// Always matches; carries no highlight ranges. The compiled form of an
    /// empty pattern, i.e. a path-only filter.
    All,
    Regex(RegexLeaf),
    And(Vec<MatchTree>),
    Or(Vec<MatchTree>),
    Not(Box<MatchTree>),
}

impl MatchTree {
    /// Evaluates the tree against the filename-only view.
    #[must_use]
    pub fn matches_path(&self, path: &[u8]) -> bool {
        match self {
            Self::All => true,
            Self::Regex(leaf) => {
                leaf.scope.covers_path() && leaf.matcher.is_match(path).unwrap_or(false)
            }
            Self::And(children) => children.iter().all(|c| c.matches_path(path)),
            Self::Or(children) => children.iter().any(|c| c.matches_path(path)),
            Self::Not(child) => !child.matches_path(path),
        }
    }

    /// Evaluates the tree against a file's path and content.
    ///
    /// Returns `None` when the tree does not match, `Some(ranges)` with the
    /// byte ranges of every positive content-scope leaf otherwise. A
    /// path-only or match-everything tree yields `Some(empty)`.
    #[must_use]
    pub fn evaluate(&self, path: &[u8], content: &[u8]) -> Option<Vec<Range<usize>>> {
        if !self.matches(path, content) {
            return None;
        }
        let mut ranges = Vec::new();
        self.collect_content_ranges(content, &mut ranges);
        ranges.sort_unstable_by_key(|r| (r.start, r.end));
        ranges.dedup();
        Some(ranges)
    }

    fn matches(&self, path: &[u8], content: &[u8]) -> bool {
        match self {
            Self::All => true,
            Self::Regex(leaf) => {
                (leaf.scope.covers_content() && leaf.matcher.is_match(content).unwrap_or(false))
                    || (leaf.scope.covers_path() && leaf.matcher.is_match(path).unwrap_or(false))
            }
            Self::And(children) => children.iter().all(|c| c.matches(path, content)),
            Self::Or(children) => children.iter().any(|c| c.matches(path, content)),
            Self::Not(child) => !child.matches(path, content),
        }
    }

    // Highlights come from positive leaves only; negated subtrees match by
    // absence and have nothing to point at.
    fn collect_content_ranges(&self, content: &[u8], dst: &mut Vec<Range<usize>>) {
        match self {
            Self::All | Self::Not(_) => {}
            Self::Regex(leaf) => {
                if leaf.scope.covers_content() {
                    let _ = leaf.matcher.find_iter(content, |m| {
                        // Zero-width matches carry no highlight
                        if m.start() < m.end() {
                            dst.push(m.start()..m.end());
                        }
                        true
                    });
                }
            }
            Self::And(children) | Self::Or(children) => {
                for c in children {
                    c.collect_content_ranges(content, dst);
                }
            }
        }
    }
}

/// Compiles the request's query tree.
pub(super) fn compile(info: &PatternInfo) -> Result<MatchTree, PatternError> {
    let scope = match (info.matches_content(), info.matches_path()) {
        (true, true) => Scope::Both,
        (false, true) => Scope::FileName,
        _ => Scope::Content,
    };
    compile_node(&info.query, scope, info.is_case_sensitive)
}

fn compile_node(
    node: &QueryNode,
    scope: Scope,
    case_sensitive: bool,
) -> Result<MatchTree, PatternError> {
    match node {
        QueryNode::Pattern(p) => compile_leaf(p, scope, case_sensitive),
        QueryNode::And { children } => {
            if children.is_empty() {
                return Ok(MatchTree::All);
            }
            let compiled = children
                .iter()
                .map(|c| compile_node(c, scope, case_sensitive))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MatchTree::And(compiled))
        }
        QueryNode::Or { children } => {
            if children.is_empty() {
                return Ok(MatchTree::All);
            }
            let compiled = children
                .iter()
                .map(|c| compile_node(c, scope, case_sensitive))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MatchTree::Or(compiled))
        }
    }
}

fn compile_leaf(
    p: &PatternNode,
    scope: Scope,
    case_sensitive: bool,
) -> Result<MatchTree, PatternError> {
    if p.value.is_empty() && !p.is_negated {
        return Ok(MatchTree::All);
    }

    let mut source = if p.is_regexp {
        reject_unsupported(&p.value)?;
        p.value.clone()
    } else {
        regex_syntax::escape(&p.value)
    };
    if p.is_word_match {
        source = format!(r"\b(?:{source})\b");
    }

    let matcher = RegexMatcherBuilder::new()
        .case_insensitive(!case_sensitive)
        .multi_line(true)
        .build(&source)
        .map_err(|e| PatternError::Syntax(e.to_string()))?;

    let leaf = MatchTree::Regex(RegexLeaf {
        matcher,
        source,
        scope,
        case_sensitive,
    });
    Ok(if p.is_negated {
        MatchTree::Not(Box::new(leaf))
    } else {
        leaf
    })
}

/// Pre-parses pattern text so constructs the engine cannot execute come back
/// as a distinct "unsupported" bad request.
fn reject_unsupported(pattern: &str) -> Result<(), PatternError> {
    use regex_syntax::ast::{parse::Parser, ErrorKind};

    match Parser::new().parse(pattern) {
        Ok(_) => Ok(()),
        Err(e) => match e.kind() {
            ErrorKind::UnsupportedLookAround => Err(PatternError::Unsupported(format!(
                "lookaround assertions are not supported: {pattern:?}"
            ))),
            ErrorKind::UnsupportedBackreference => Err(PatternError::Unsupported(format!(
                "backreferences are not supported: {pattern:?}"
            ))),
            _ => Err(PatternError::Syntax(e.to_string())),
        },
    }
}
