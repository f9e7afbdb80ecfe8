//! End-to-end scan scenarios: full unindexed searches over a commit
//! archive, driven through the whole `SearchService` pipeline (the index
//! engine knows nothing here, so every request falls back to a full scan).

mod common;

use common::{hello_corpus, request, TestEnv, COMMIT_T};
use snapgrep::protocol::{PatternInfo, PatternNode, QueryNode};

fn word_match(mut info: PatternInfo) -> PatternInfo {
    if let QueryNode::Pattern(ref mut p) = info.query {
        p.is_word_match = true;
    }
    info
}

#[tokio::test(flavor = "multi_thread")]
async fn test_literal_content_match() {
    let env = TestEnv::new();
    hello_corpus(&env.git, COMMIT_T);

    let req = request(PatternInfo::literal("world"));
    let (matches, done) = env.run(&req).await;

    assert_eq!(done, snapgrep::protocol::DoneEvent::default());
    assert_eq!(matches.len(), 2);

    let readme = &matches[0];
    assert_eq!(readme.path, "README.md");
    assert_eq!(readme.language.as_deref(), Some("Markdown"));
    let lines: Vec<u64> = readme
        .chunk_matches
        .iter()
        .map(|c| c.content_start.line)
        .collect();
    assert_eq!(lines, vec![0, 2]);

    let main_go = &matches[1];
    assert_eq!(main_go.path, "main.go");
    assert_eq!(main_go.language.as_deref(), Some("Go"));
    assert_eq!(main_go.chunk_matches.len(), 1);
    assert_eq!(main_go.chunk_matches[0].content_start.line, 5);
    assert_eq!(
        main_go.chunk_matches[0].content,
        "\tfmt.Println(\"Hello world\")\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_word_match_with_include_glob() {
    let env = TestEnv::new();
    hello_corpus(&env.git, COMMIT_T);

    let mut info = word_match(PatternInfo::literal("main"));
    info.include_patterns = vec!["*.go".to_string()];
    let (matches, done) = env.run(&request(info)).await;

    assert!(!done.limit_hit);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "main.go");
    let lines: Vec<u64> = matches[0]
        .chunk_matches
        .iter()
        .map(|c| c.content_start.line)
        .collect();
    assert_eq!(lines, vec![0, 4]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_case_sensitivity() {
    let env = TestEnv::new();
    hello_corpus(&env.git, COMMIT_T);

    let mut info = PatternInfo::literal("World");
    info.is_case_sensitive = true;
    let (matches, _) = env.run(&request(info)).await;

    // Only README's "# Hello World" has the capitalized form
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "README.md");
    assert_eq!(matches[0].chunk_matches.len(), 1);
    assert_eq!(matches[0].chunk_matches[0].content_start.line, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_limit_trims_to_exact_count() {
    let env = TestEnv::new();
    // 100 files, each with 10 isolated matches of "foo"
    let content = "foo\n\n".repeat(10);
    for i in 0..100 {
        env.git
            .add_file_bytes(COMMIT_T, &format!("file_{i:03}.txt"), content.as_bytes());
    }

    let mut info = PatternInfo::literal("foo");
    info.limit = 33;
    let (matches, done) = env.run(&request(info)).await;

    assert!(done.limit_hit);
    let chunk_total: usize = matches.iter().map(|m| m.chunk_matches.len()).sum();
    let range_total: usize = matches
        .iter()
        .flat_map(|m| &m.chunk_matches)
        .map(|c| c.ranges.len())
        .sum();
    assert_eq!(chunk_total, 33);
    assert_eq!(range_total, 33);
    assert!(matches.len() <= 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exact_limit_is_not_limit_hit() {
    let env = TestEnv::new();
    env.git.add_commit(COMMIT_T, &[("one.txt", "foo\n")]);

    let mut info = PatternInfo::literal("foo");
    info.limit = 1;
    let (matches, done) = env.run(&request(info)).await;
    assert_eq!(matches.len(), 1);
    assert!(!done.limit_hit);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_pattern_with_includes_lists_files() {
    let env = TestEnv::new();
    hello_corpus(&env.git, COMMIT_T);

    let mut info = PatternInfo::literal("");
    info.include_patterns = vec!["*.md".to_string()];
    let (matches, done) = env.run(&request(info)).await;

    assert!(!done.limit_hit);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "README.md");
    assert!(matches[0].chunk_matches.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exclude_pattern_filters_paths() {
    let env = TestEnv::new();
    hello_corpus(&env.git, COMMIT_T);

    let mut info = PatternInfo::literal("world");
    info.exclude_pattern = "*.md".to_string();
    let (matches, _) = env.run(&request(info)).await;

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "main.go");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_files_skip_content_but_not_path() {
    let env = TestEnv::new();
    env.git
        .add_file_bytes(COMMIT_T, "blob.bin", b"\x00binary with world inside");
    env.git.add_commit(COMMIT_T, &[("plain.txt", "world\n")]);

    // Content-only: binary file is invisible
    let (matches, _) = env.run(&request(PatternInfo::literal("world"))).await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "plain.txt");

    // Path matching still sees the binary file's name
    let mut info = PatternInfo::literal("blob");
    info.pattern_matches_content = false;
    info.pattern_matches_path = true;
    let (matches, _) = env.run(&request(info)).await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "blob.bin");
    assert!(matches[0].path_matches);
    assert!(matches[0].chunk_matches.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_symlink_is_searched_as_target_text() {
    let env = TestEnv::new();
    env.git.add_commit(COMMIT_T, &[("real.txt", "nothing here\n")]);
    env.git.add_symlink(COMMIT_T, "link.txt", "configs/world.yaml");

    let (matches, _) = env.run(&request(PatternInfo::literal("world"))).await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "link.txt");
    assert_eq!(matches[0].chunk_matches[0].content, "configs/world.yaml");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_zero_size_files_produce_no_chunks() {
    let env = TestEnv::new();
    env.git.add_commit(COMMIT_T, &[("empty.txt", "")]);

    let (matches, _) = env.run(&request(PatternInfo::literal("anything"))).await;
    assert!(matches.is_empty());

    // But an empty pattern still lists the file, chunkless
    let (matches, _) = env.run(&request(PatternInfo::literal(""))).await;
    assert_eq!(matches.len(), 1);
    assert!(matches[0].chunk_matches.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_language_filters() {
    let env = TestEnv::new();
    hello_corpus(&env.git, COMMIT_T);

    let mut info = PatternInfo::literal("world");
    info.include_langs = vec!["go".to_string()];
    let (matches, _) = env.run(&request(info)).await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "main.go");

    let mut info = PatternInfo::literal("world");
    info.exclude_langs = vec!["Go".to_string()];
    let (matches, _) = env.run(&request(info)).await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, "README.md");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multibyte_columns() {
    let env = TestEnv::new();
    env.git
        .add_commit(COMMIT_T, &[("uni.txt", "héllo wörld wörld\n")]);

    let mut info = PatternInfo::literal("wörld");
    info.is_case_sensitive = true;
    let (matches, _) = env.run(&request(info)).await;
    assert_eq!(matches.len(), 1);
    let ranges = &matches[0].chunk_matches[0].ranges;
    assert_eq!(ranges.len(), 2);
    // Columns count code points, offsets count bytes
    assert_eq!(ranges[0].start.column, 6);
    assert_eq!(ranges[0].start.offset, 7);
    assert_eq!(ranges[1].start.column, 12);
    assert_eq!(ranges[1].start.offset, 14);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rerun_is_idempotent() {
    let env = TestEnv::new();
    hello_corpus(&env.git, COMMIT_T);

    let req = request(PatternInfo::literal("world"));
    let (first, _) = env.run(&req).await;
    let (second, _) = env.run(&req).await;
    assert_eq!(first, second);
    // The archive was fetched once; the second run hit the cache
    assert_eq!(env.git.fetch_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deadline_returns_timeout_error() {
    let env = TestEnv::new();
    hello_corpus(&env.git, COMMIT_T);
    env.git.set_fetch_delay(std::time::Duration::from_secs(30));

    let mut req = request(PatternInfo::literal("world"));
    req.deadline_ms = Some(100);
    let (matches, done) = env.run(&req).await;

    assert!(matches.is_empty());
    assert!(!done.limit_hit);
    let err = done.error.expect("deadline should surface an error");
    assert!(err.contains("deadline"), "unexpected error: {err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_validation_rejects_before_streaming() {
    let env = TestEnv::new();
    let mut req = request(PatternInfo::literal("x"));
    req.commit = "not-a-commit".to_string();

    let result = env
        .service
        .run(&req, Box::new(|_| panic!("no match should be streamed")))
        .await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), snapgrep::ErrorKind::Validation);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsupported_regex_is_bad_request() {
    let env = TestEnv::new();
    let mut info = PatternInfo::literal("x");
    info.query = QueryNode::Pattern(PatternNode::regexp(r"foo(?=bar)"));
    let result = env.service.run(&request(info), Box::new(|_| {})).await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), snapgrep::ErrorKind::Validation);
    assert_eq!(err.code(), "UNSUPPORTED_PATTERN");
}
