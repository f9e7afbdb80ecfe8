//! Index-engine query construction.
//!
//! The query AST is value-only: the [`IndexClient`](crate::backends::IndexClient)
//! adapter serializes it however its wire format wants. Semantics mirror the
//! local [`MatchTree`](super::MatchTree) so indexed and unindexed results
//! agree; the hybrid coordinator additionally ANDs in a
//! `Not(PathSet(changed paths))` before searching.

use crate::error::PatternError;
use crate::pattern::paths::to_regex_source;
use crate::pattern::Scope;
use crate::protocol::{PatternInfo, PatternNode, QueryNode};
use crate::types::RepoId;

/// Query tree for the external index engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    /// Restricts to one branch of one repository. Always `HEAD` here: the
    /// index serves whatever commit it has ingested for the default branch.
    RepoBranch { repo: RepoId, branch: String },
    /// Literal substring leaf.
    Substring {
        value: String,
        case_sensitive: bool,
        scope: Scope,
    },
    /// Regexp leaf.
    Regexp {
        value: String,
        case_sensitive: bool,
        scope: Scope,
    },
    /// Matches everything (the empty pattern).
    All,
    And(Vec<IndexQuery>),
    Or(Vec<IndexQuery>),
    Not(Box<IndexQuery>),
    /// Exact-path set; used negated to mask changed paths out of indexed
    /// results.
    PathSet { paths: Vec<String> },
}

impl IndexQuery {
    /// Wraps this query with the coordinator's changed-path mask.
    #[must_use]
    pub fn excluding_paths(self, paths: Vec<String>) -> Self {
        if paths.is_empty() {
            return self;
        }
        Self::And(vec![
            self,
            Self::Not(Box::new(Self::PathSet { paths })),
        ])
    }
}

/// Builds the index-engine query equivalent to the local match tree.
///
/// # Errors
///
/// Returns [`PatternError`] for invalid path filters; pattern leaves are
/// passed through verbatim (the index engine compiles its own automata).
pub fn build_index_query(info: &PatternInfo, repo: RepoId) -> Result<IndexQuery, PatternError> {
    let scope = match (info.matches_content(), info.matches_path()) {
        (true, true) => Scope::Both,
        (false, true) => Scope::FileName,
        _ => Scope::Content,
    };

    let mut clauses = vec![IndexQuery::RepoBranch {
        repo,
        branch: "HEAD".to_string(),
    }];
    clauses.push(query_node(&info.query, scope, info.is_case_sensitive));

    for include in &info.include_patterns {
        let source = to_regex_source(include, info.path_patterns_are_regexps)?;
        clauses.push(IndexQuery::Regexp {
            value: source,
            case_sensitive: true,
            scope: Scope::FileName,
        });
    }
    if !info.exclude_pattern.is_empty() {
        let source = to_regex_source(&info.exclude_pattern, info.path_patterns_are_regexps)?;
        clauses.push(IndexQuery::Not(Box::new(IndexQuery::Regexp {
            value: source,
            case_sensitive: true,
            scope: Scope::FileName,
        })));
    }

    Ok(IndexQuery::And(clauses))
}

fn query_node(node: &QueryNode, scope: Scope, case_sensitive: bool) -> IndexQuery {
    match node {
        QueryNode::Pattern(p) => query_leaf(p, scope, case_sensitive),
        QueryNode::And { children } => {
            if children.is_empty() {
                IndexQuery::All
            } else {
                IndexQuery::And(
                    children
                        .iter()
                        .map(|c| query_node(c, scope, case_sensitive))
                        .collect(),
                )
            }
        }
        QueryNode::Or { children } => {
            if children.is_empty() {
                IndexQuery::All
            } else {
                IndexQuery::Or(
                    children
                        .iter()
                        .map(|c| query_node(c, scope, case_sensitive))
                        .collect(),
                )
            }
        }
    }
}

fn query_leaf(p: &PatternNode, scope: Scope, case_sensitive: bool) -> IndexQuery {
    if p.value.is_empty() && !p.is_negated {
        return IndexQuery::All;
    }

    let leaf = if p.is_regexp || p.is_word_match {
        let mut value = if p.is_regexp {
            p.value.clone()
        } else {
            regex_syntax::escape(&p.value)
        };
        if p.is_word_match {
            value = format!(r"\b(?:{value})\b");
        }
        IndexQuery::Regexp {
            value,
            case_sensitive,
            scope,
        }
    } else {
        IndexQuery::Substring {
            value: p.value.clone(),
            case_sensitive,
            scope,
        }
    };

    if p.is_negated {
        IndexQuery::Not(Box::new(leaf))
    } else {
        leaf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PatternInfo;

    #[test]
    fn test_branch_head_and_substring() {
        let info = PatternInfo::literal("world");
        let q = build_index_query(&info, RepoId::new(3)).unwrap();
        let IndexQuery::And(clauses) = q else {
            panic!("expected top-level And");
        };
        assert_eq!(
            clauses[0],
            IndexQuery::RepoBranch {
                repo: RepoId::new(3),
                branch: "HEAD".into()
            }
        );
        assert_eq!(
            clauses[1],
            IndexQuery::Substring {
                value: "world".into(),
                case_sensitive: false,
                scope: Scope::Content
            }
        );
    }

    #[test]
    fn test_includes_become_filename_regexps() {
        let mut info = PatternInfo::literal("x");
        info.include_patterns = vec!["*.go".into()];
        info.exclude_pattern = "vendor/*".into();
        let q = build_index_query(&info, RepoId::new(1)).unwrap();
        let IndexQuery::And(clauses) = q else {
            panic!("expected top-level And");
        };
        assert_eq!(clauses.len(), 4);
        assert!(matches!(
            &clauses[2],
            IndexQuery::Regexp { scope: Scope::FileName, .. }
        ));
        assert!(matches!(&clauses[3], IndexQuery::Not(_)));
    }

    #[test]
    fn test_excluding_paths_wraps_with_not() {
        let info = PatternInfo::literal("x");
        let q = build_index_query(&info, RepoId::new(1)).unwrap();
        let masked = q.clone().excluding_paths(vec!["changed.go".into()]);
        let IndexQuery::And(clauses) = masked else {
            panic!("expected And");
        };
        assert_eq!(clauses[0], q);
        assert_eq!(
            clauses[1],
            IndexQuery::Not(Box::new(IndexQuery::PathSet {
                paths: vec!["changed.go".into()]
            }))
        );
        // Empty mask is a no-op
        assert_eq!(q.clone().excluding_paths(vec![]), q);
    }

    #[test]
    fn test_word_match_compiles_to_regexp() {
        let mut info = PatternInfo::literal("main");
        if let QueryNode::Pattern(ref mut p) = info.query {
            p.is_word_match = true;
        }
        let q = build_index_query(&info, RepoId::new(1)).unwrap();
        let IndexQuery::And(clauses) = q else {
            panic!("expected And");
        };
        assert_eq!(
            clauses[1],
            IndexQuery::Regexp {
                value: r"\b(?:main)\b".into(),
                case_sensitive: false,
                scope: Scope::Content
            }
        );
    }
}
