//! Common test utilities for snapgrep integration tests.
//!
//! Provides `TestEnv` wiring a `SearchService` to scripted fakes of the two
//! external collaborators: a git server that serves tar archives out of an
//! in-memory commit map, and an index engine that replays scripted results.

#![allow(dead_code)] // Test utilities may not all be used in every test file

use async_trait::async_trait;
use snapgrep::backends::{
    ChangedFile, GitRemote, IndexClient, IndexFileMatch, IndexSearchOptions, IndexSender,
    IndexStats,
};
use snapgrep::error::BackendError;
use snapgrep::pattern::IndexQuery;
use snapgrep::protocol::{
    ChunkMatch, DoneEvent, Features, FileMatch, Location, PatternInfo, SearchRequest,
};
use snapgrep::store::ArchiveStore;
use snapgrep::types::{CommitOid, RepoId};
use snapgrep::{SearchService, Settings};
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const REPO: &str = "github.com/org/example";
pub const REPO_ID: u32 = 7;

/// Target commit used by most tests.
pub const COMMIT_T: &str = "1111111111111111111111111111111111111111";
/// Indexed commit for hybrid tests.
pub const COMMIT_I: &str = "2222222222222222222222222222222222222222";

#[derive(Clone)]
enum FakeEntry {
    File(Vec<u8>),
    Symlink(String),
}

/// Scripted git server: an in-memory commit map served as tar archives.
#[derive(Default)]
pub struct FakeGit {
    commits: Mutex<HashMap<String, Vec<(String, FakeEntry)>>>,
    diffs: Mutex<HashMap<(String, String), Vec<ChangedFile>>>,
    fetch_delay: Mutex<Duration>,
    fetches: AtomicUsize,
    last_paths: Mutex<Option<Vec<String>>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_commit(&self, oid: &str, files: &[(&str, &str)]) {
        let mut commits = self.commits.lock().unwrap();
        let entries = commits.entry(oid.to_string()).or_default();
        for (p, c) in files {
            entries.push(((*p).to_string(), FakeEntry::File(c.as_bytes().to_vec())));
        }
    }

    pub fn add_file_bytes(&self, oid: &str, path: &str, content: &[u8]) {
        self.commits
            .lock()
            .unwrap()
            .entry(oid.to_string())
            .or_default()
            .push((path.to_string(), FakeEntry::File(content.to_vec())));
    }

    pub fn add_symlink(&self, oid: &str, path: &str, target: &str) {
        self.commits
            .lock()
            .unwrap()
            .entry(oid.to_string())
            .or_default()
            .push((path.to_string(), FakeEntry::Symlink(target.to_string())));
    }

    pub fn set_diff(&self, base: &str, head: &str, changes: Vec<ChangedFile>) {
        self.diffs
            .lock()
            .unwrap()
            .insert((base.to_string(), head.to_string()), changes);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Path filter passed to the most recent fetch, sorted.
    pub fn last_fetch_paths(&self) -> Option<Vec<String>> {
        self.last_paths.lock().unwrap().clone()
    }

    fn build_tar(&self, oid: &str, paths: Option<&[String]>) -> Option<Vec<u8>> {
        let commits = self.commits.lock().unwrap();
        let entries = commits.get(oid)?;
        let mut builder = tar::Builder::new(Vec::new());
        for (path, entry) in entries {
            if let Some(filter) = paths {
                if !filter.iter().any(|p| p == path) {
                    continue;
                }
            }
            match entry {
                FakeEntry::File(content) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append_data(&mut header, path, content.as_slice()).unwrap();
                }
                FakeEntry::Symlink(target) => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_cksum();
                    builder.append_link(&mut header, path, target).unwrap();
                }
            }
        }
        Some(builder.into_inner().unwrap())
    }
}

#[async_trait]
impl GitRemote for FakeGit {
    async fn fetch_tar(
        &self,
        repo: &str,
        commit: &CommitOid,
        paths: Option<&[String]>,
    ) -> Result<Box<dyn Read + Send>, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_paths.lock().unwrap() = paths.map(|p| {
            let mut v = p.to_vec();
            v.sort();
            v
        });
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.build_tar(commit.as_str(), paths) {
            Some(tar) => Ok(Box::new(Cursor::new(tar))),
            None => Err(BackendError::RevisionNotFound {
                repo: repo.to_string(),
                commit: commit.as_str().to_string(),
            }),
        }
    }

    async fn changed_files(
        &self,
        _repo: &str,
        base: &CommitOid,
        head: &CommitOid,
    ) -> Result<Vec<ChangedFile>, BackendError> {
        let diffs = self.diffs.lock().unwrap();
        Ok(diffs
            .get(&(base.as_str().to_string(), head.as_str().to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Scripted index engine.
///
/// `list` replays its queue (repeating the last element once drained);
/// `stream_search` pops one scripted result set per call.
#[derive(Default)]
pub struct FakeIndex {
    listed: Mutex<VecDeque<Option<String>>>,
    results: Mutex<VecDeque<Vec<IndexFileMatch>>>,
    crashes: Mutex<VecDeque<u32>>,
    searches: AtomicUsize,
    lists: AtomicUsize,
}

impl FakeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index that has never seen this repository.
    pub fn unindexed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_indexed_commit(&self, oid: Option<&str>) {
        self.listed
            .lock()
            .unwrap()
            .push_back(oid.map(str::to_string));
    }

    pub fn push_results(&self, results: Vec<IndexFileMatch>) {
        self.results.lock().unwrap().push_back(results);
    }

    pub fn push_crashes(&self, crashes: u32) {
        self.crashes.lock().unwrap().push_back(crashes);
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexClient for FakeIndex {
    async fn list(&self, _repo: RepoId) -> Result<Option<CommitOid>, BackendError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.listed.lock().unwrap();
        let next = if queue.len() > 1 {
            queue.pop_front().unwrap_or(None)
        } else {
            queue.front().cloned().unwrap_or(None)
        };
        match next {
            Some(oid) => Ok(Some(
                CommitOid::parse(&oid).map_err(BackendError::Internal)?,
            )),
            None => Ok(None),
        }
    }

    async fn stream_search(
        &self,
        _query: &IndexQuery,
        _opts: &IndexSearchOptions,
        cancel: &CancellationToken,
        sender: &dyn IndexSender,
    ) -> Result<IndexStats, BackendError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let batch = self.results.lock().unwrap().pop_front().unwrap_or_default();
        if !cancel.is_cancelled() && !batch.is_empty() {
            sender.send(batch);
        }
        let crashes = self.crashes.lock().unwrap().pop_front().unwrap_or(0);
        Ok(IndexStats { crashes })
    }
}

/// A simple index result: one whole-line chunk at line 0.
pub fn index_match(path: &str, version: &str, line: &str) -> IndexFileMatch {
    IndexFileMatch {
        path: path.to_string(),
        version: version.to_string(),
        chunk_matches: vec![ChunkMatch {
            content: format!("{line}\n"),
            content_start: Location::default(),
            ranges: vec![snapgrep::protocol::MatchRange {
                start: Location::default(),
                end: Location {
                    offset: line.len() as u64,
                    line: 0,
                    column: line.chars().count() as u64,
                },
            }],
        }],
        language: None,
    }
}

/// A complete test environment with all services wired together.
pub struct TestEnv {
    pub dir: TempDir,
    pub git: Arc<FakeGit>,
    pub index: Arc<FakeIndex>,
    pub service: SearchService,
}

/// Opt-in test logging: `RUST_LOG=snapgrep=debug cargo test -- --nocapture`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        init_logging();
        let dir = TempDir::new().expect("Failed to create temp directory");
        let git = Arc::new(FakeGit::new());
        let index = Arc::new(FakeIndex::new());
        let store = ArchiveStore::open(
            dir.path().join("cache"),
            &settings,
            Arc::clone(&git) as Arc<dyn GitRemote>,
        )
        .expect("Failed to open archive store");
        let service = SearchService::new(
            store,
            Arc::clone(&index) as Arc<dyn IndexClient>,
            Arc::clone(&git) as Arc<dyn GitRemote>,
            settings,
        )
        .expect("Failed to build search service");

        Self {
            dir,
            git,
            index,
            service,
        }
    }

    /// Runs a request, returning matches sorted by path plus the done event.
    pub async fn run(&self, req: &SearchRequest) -> (Vec<FileMatch>, DoneEvent) {
        let collected: Arc<Mutex<Vec<FileMatch>>> = Arc::new(Mutex::new(Vec::new()));
        let target = Arc::clone(&collected);
        let done = self
            .service
            .run(req, Box::new(move |m| target.lock().unwrap().push(m)))
            .await
            .expect("request should pass validation");
        let mut matches = collected.lock().unwrap().clone();
        matches.sort_by(|a, b| a.path.cmp(&b.path));
        (matches, done)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A minimal valid request against [`COMMIT_T`].
pub fn request(pattern: PatternInfo) -> SearchRequest {
    SearchRequest {
        repo: REPO.to_string(),
        repo_id: RepoId::new(REPO_ID),
        commit: COMMIT_T.to_string(),
        url: String::new(),
        pattern_info: pattern,
        fetch_timeout_ms: 5_000,
        deadline_ms: None,
        features: Features::default(),
    }
}

/// The two-file corpus used by the end-to-end match scenarios.
pub fn hello_corpus(git: &FakeGit, oid: &str) {
    git.add_commit(
        oid,
        &[
            ("README.md", "# Hello World\n\nHello world example in go"),
            (
                "main.go",
                "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"Hello world\")\n}\n",
            ),
        ],
    );
}
