//! Content-addressed per-commit archive cache with single-flighted fetches.
//!
//! `prepare` hands out refcounted read handles over a local extraction of a
//! commit's working tree, fetching through the [`GitRemote`] collaborator on
//! a miss. Exactly one fetch per key is ever in flight: the winner runs it
//! on a detached task with its own timeout (so one caller's cancellation
//! cannot poison other waiters) and broadcasts the result over a per-key
//! watch channel.
//!
//! Eviction runs after every successful insert: least-recently-accessed
//! zero-refcount entries are deleted until the cache fits its byte budget,
//! and entries unused past the age ceiling go regardless of budget.

mod ingest;
mod meta;

pub use ingest::{Manifest, ManifestEntry};

use crate::backends::GitRemote;
use crate::config::Settings;
use crate::error::{StoreError, StoreResult};
use crate::types::{paths_digest, ArchiveKey, FULL_TREE_DIGEST};
use ahash::AHashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ingest::{IngestFilter, TREE_DIR};
use meta::{ArchiveRow, CacheMeta};
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Caller-supplied predicate for paths to omit from the cache entirely.
pub type IgnoreFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Per-call options for [`ArchiveStore::prepare`].
#[derive(Clone)]
pub struct PrepareOpts {
    /// Budget for the fetch + ingest, should this call have to populate the
    /// cache.
    pub fetch_timeout: Duration,
    /// Restrict the archive to these paths (hybrid mode). `None` fetches the
    /// full tree.
    pub paths: Option<Vec<String>>,
    /// Paths to drop at ingest so search never sees them.
    pub ignore: Option<IgnoreFn>,
}

impl PrepareOpts {
    #[must_use]
    pub fn full_tree(fetch_timeout: Duration) -> Self {
        Self {
            fetch_timeout,
            paths: None,
            ignore: None,
        }
    }

    #[must_use]
    pub fn subset(fetch_timeout: Duration, paths: Vec<String>) -> Self {
        Self {
            fetch_timeout,
            paths: Some(paths),
            ignore: None,
        }
    }
}

/// The archive cache.
///
/// Cheap to clone; all clones share one on-disk cache and one in-memory
/// accounting state.
#[derive(Clone)]
pub struct ArchiveStore {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    max_cache_bytes: u64,
    max_entry_age: Duration,
    max_file_size_bytes: u64,
    always_search: GlobSet,
    meta: CacheMeta,
    git: Arc<dyn GitRemote>,
    state: Mutex<State>,
    staging_seq: AtomicU64,
}

#[derive(Default)]
struct State {
    /// Everything extracted and published on disk, keyed by cache stem.
    resident: AHashMap<String, Resident>,
    /// Fetches currently in flight, keyed by cache stem.
    inflight: AHashMap<String, watch::Receiver<FetchSlot>>,
}

struct Resident {
    data: Arc<ArchiveData>,
    refs: usize,
}

type FetchSlot = Option<StoreResult<Arc<ArchiveData>>>;

/// One published archive: directory plus its deterministic entry list.
pub struct ArchiveData {
    key: ArchiveKey,
    stem: String,
    dir: PathBuf,
    manifest: Manifest,
}

/// A refcounted read handle over one cached archive.
///
/// The entry cannot be evicted while any handle to it is live; release
/// happens on `Drop`, on every exit path.
pub struct ArchiveHandle {
    data: Arc<ArchiveData>,
    store: Arc<Inner>,
}

impl ArchiveHandle {
    #[must_use]
    pub fn key(&self) -> &ArchiveKey {
        &self.data.key
    }

    /// Entries sorted by path. Iteration order is deterministic.
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.data.manifest.entries
    }

    /// Reads one entry's bytes.
    ///
    /// # Errors
    ///
    /// `NotFound` for paths absent from the manifest; other IO errors pass
    /// through.
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_into(path, &mut buf)?;
        Ok(buf)
    }

    /// Reads one entry into a reusable buffer, clearing it first and
    /// reserving the entry's size. Returns the byte count.
    ///
    /// # Errors
    ///
    /// `NotFound` for paths absent from the manifest; other IO errors pass
    /// through.
    pub fn read_into(&self, path: &str, buf: &mut Vec<u8>) -> io::Result<usize> {
        let entry = self.data.manifest.get(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("not in archive: {path}"))
        })?;
        buf.clear();
        buf.reserve(entry.size as usize);
        let mut file = std::fs::File::open(self.data.dir.join(TREE_DIR).join(path))?;
        file.read_to_end(buf)
    }
}

impl Drop for ArchiveHandle {
    fn drop(&mut self) {
        let mut state = lock(&self.store.state);
        if let Some(r) = state.resident.get_mut(&self.data.stem) {
            r.refs = r.refs.saturating_sub(1);
        }
    }
}

impl fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("key", &self.data.key)
            .field("entries", &self.data.manifest.entries.len())
            .finish()
    }
}

fn lock(m: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ArchiveStore {
    /// Opens the cache rooted at `root`, reconciling the metadata database
    /// against whatever is actually on disk: rows without directories are
    /// purged, orphan directories and interrupted staging directories are
    /// deleted. Partial entries never survive a restart.
    ///
    /// Does filesystem work; call from a blocking context at startup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for unbuildable always-search globs,
    /// [`StoreError::Meta`] / [`StoreError::Io`] for an unusable root.
    pub fn open(
        root: impl Into<PathBuf>,
        settings: &Settings,
        git: Arc<dyn GitRemote>,
    ) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut globs = GlobSetBuilder::new();
        for raw in &settings.always_search_globs {
            let glob = Glob::new(raw).map_err(|e| {
                StoreError::Config(format!("invalid always-search glob {raw:?}: {e}"))
            })?;
            globs.add(glob);
        }
        let always_search = globs
            .build()
            .map_err(|e| StoreError::Config(format!("always-search globs: {e}")))?;

        let meta = CacheMeta::open(&root.join("meta.db"))?;

        let mut resident = AHashMap::new();
        for row in meta.list()? {
            let dir = root.join(&row.stem);
            let loaded = crate::types::CommitOid::parse(&row.commit)
                .map_err(StoreError::Meta)
                .and_then(|oid| Manifest::load(&dir).map(|m| (oid, m)));
            match loaded {
                Ok((commit, manifest)) => {
                    let data = Arc::new(ArchiveData {
                        key: ArchiveKey::new(row.repo.clone(), commit),
                        stem: row.stem.clone(),
                        dir,
                        manifest,
                    });
                    resident.insert(row.stem.clone(), Resident { data, refs: 0 });
                }
                Err(e) => {
                    tracing::warn!(stem = %row.stem, error = %e, "dropping unusable cache entry");
                    let _ = meta.remove(&row.stem);
                    let _ = std::fs::remove_dir_all(&dir);
                }
            }
        }

        // Orphan and staging cleanup
        for dirent in std::fs::read_dir(&root)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name.starts_with("meta.db") {
                continue;
            }
            if !dirent.file_type()?.is_dir() {
                continue;
            }
            if name.contains(".tmp") || !resident.contains_key(&name) {
                tracing::debug!(dir = %name, "removing stray cache directory");
                let _ = std::fs::remove_dir_all(dirent.path());
            }
        }

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                max_cache_bytes: settings.max_cache_bytes,
                max_entry_age: settings.max_entry_age,
                max_file_size_bytes: settings.max_file_size_bytes,
                always_search,
                meta,
                git,
                state: Mutex::new(State {
                    resident,
                    inflight: AHashMap::new(),
                }),
                staging_seq: AtomicU64::new(0),
            }),
        })
    }

    /// Returns a handle to the archive for `key`, fetching it if absent.
    ///
    /// Concurrent calls for the same key share one underlying fetch and all
    /// observe the same outcome. On success the entry's last-access time is
    /// bumped and the handle is valid until dropped.
    ///
    /// # Errors
    ///
    /// Temporary fetch failures ([`StoreError::kind`] ==
    /// `ErrorKind::Temporary`) may be retried by the caller; the failed
    /// entry is never persisted. Cancellation returns
    /// [`StoreError::Canceled`].
    pub async fn prepare(
        &self,
        key: &ArchiveKey,
        opts: &PrepareOpts,
        cancel: &CancellationToken,
    ) -> StoreResult<ArchiveHandle> {
        let digest = match &opts.paths {
            Some(paths) => paths_digest(paths),
            None => FULL_TREE_DIGEST.to_string(),
        };
        let stem = key.cache_stem(&digest);

        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Canceled);
            }

            let rx = {
                let mut state = lock(&self.inner.state);
                if let Some(r) = state.resident.get_mut(&stem) {
                    r.refs += 1;
                    let data = Arc::clone(&r.data);
                    drop(state);
                    self.touch(&stem);
                    return Ok(ArchiveHandle {
                        data,
                        store: Arc::clone(&self.inner),
                    });
                }
                match state.inflight.get(&stem) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.inflight.insert(stem.clone(), rx.clone());
                        drop(state);
                        self.spawn_fetch(key.clone(), stem.clone(), opts.clone(), tx);
                        rx
                    }
                }
            };

            // Loop back to claim from the resident map; if the entry got
            // evicted in the window between publication and this claim, the
            // next iteration simply fetches again.
            let _data = wait_for_slot(rx, cancel).await?;
        }
    }

    /// Current accounted cache size in bytes.
    #[must_use]
    pub fn usage(&self) -> u64 {
        self.inner.meta.total_bytes().unwrap_or(0)
    }

    // Bump the LRU clock; accounting only, never worth failing a search.
    fn touch(&self, stem: &str) {
        if let Err(e) = self.inner.meta.touch(stem, meta::unix_now()) {
            tracing::warn!(stem, error = %e, "failed to bump archive access time");
        }
    }

    fn spawn_fetch(
        &self,
        key: ArchiveKey,
        stem: String,
        opts: PrepareOpts,
        tx: watch::Sender<FetchSlot>,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = Inner::fetch(&inner, &key, &stem, &opts).await;

            match &result {
                Ok(data) => {
                    {
                        let mut state = lock(&inner.state);
                        state
                            .resident
                            .insert(stem.clone(), Resident { data: Arc::clone(data), refs: 0 });
                    }
                    // Opportunistic eviction on every successful insert,
                    // completed before waiters are released so they observe
                    // post-eviction state.
                    let evict_inner = Arc::clone(&inner);
                    let evict_stem = stem.clone();
                    let _ = tokio::task::spawn_blocking(move || {
                        Inner::evict(&evict_inner, &evict_stem);
                    })
                    .await;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "archive fetch failed");
                }
            }

            lock(&inner.state).inflight.remove(&stem);
            let _ = tx.send(Some(result));
        });
    }
}

async fn wait_for_slot(
    mut rx: watch::Receiver<FetchSlot>,
    cancel: &CancellationToken,
) -> StoreResult<Arc<ArchiveData>> {
    loop {
        let slot = rx.borrow_and_update().clone();
        if let Some(result) = slot {
            return result;
        }
        tokio::select! {
            () = cancel.cancelled() => return Err(StoreError::Canceled),
            changed = rx.changed() => {
                if changed.is_err() {
                    return Err(StoreError::Io("archive fetch task aborted".into()));
                }
            }
        }
    }
}

impl Inner {
    async fn fetch(
        inner: &Arc<Inner>,
        key: &ArchiveKey,
        stem: &str,
        opts: &PrepareOpts,
    ) -> StoreResult<Arc<ArchiveData>> {
        let seq = inner.staging_seq.fetch_add(1, Ordering::Relaxed);
        let staging = inner.root.join(format!("{stem}.tmp{seq}"));

        let result = match tokio::time::timeout(
            opts.fetch_timeout,
            Self::fetch_into(inner, key, stem, opts, staging.clone()),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(StoreError::FetchTimeout(opts.fetch_timeout)),
        };

        if result.is_err() {
            // The staging directory must never become visible
            let cleanup = staging.clone();
            let _ = tokio::task::spawn_blocking(move || {
                let _ = std::fs::remove_dir_all(cleanup);
            })
            .await;
        }
        result
    }

    async fn fetch_into(
        inner: &Arc<Inner>,
        key: &ArchiveKey,
        stem: &str,
        opts: &PrepareOpts,
        staging: PathBuf,
    ) -> StoreResult<Arc<ArchiveData>> {
        tracing::debug!(key = %key, "fetching archive");
        let reader = inner
            .git
            .fetch_tar(&key.repo, &key.commit, opts.paths.as_deref())
            .await
            .map_err(StoreError::Fetch)?;

        let max_file_size = inner.max_file_size_bytes;
        let always_search = inner.always_search.clone();
        let ignore = opts.ignore.clone();
        let ingest_staging = staging.clone();
        let manifest = tokio::task::spawn_blocking(move || {
            let filter = IngestFilter {
                max_file_size,
                always_search: &always_search,
                ignore: ignore.as_deref(),
            };
            ingest::ingest(reader, &ingest_staging, &filter)
        })
        .await
        .map_err(|e| StoreError::Io(format!("ingest task failed: {e}")))??;

        // Publish atomically: the entry appears in full or not at all
        let final_dir = inner.root.join(stem);
        {
            let from = staging;
            let to = final_dir.clone();
            tokio::task::spawn_blocking(move || -> io::Result<()> {
                if to.exists() {
                    std::fs::remove_dir_all(&to)?;
                }
                std::fs::rename(&from, &to)
            })
            .await
            .map_err(|e| StoreError::Io(format!("publish task failed: {e}")))??;
        }

        let row = ArchiveRow {
            stem: stem.to_string(),
            repo: key.repo.clone(),
            commit: key.commit.as_str().to_string(),
            bytes: manifest.total_bytes(),
            last_access: meta::unix_now(),
        };
        let meta = inner.meta.clone();
        tokio::task::spawn_blocking(move || meta.upsert(&row))
            .await
            .map_err(|e| StoreError::Io(format!("meta task failed: {e}")))??;

        tracing::debug!(key = %key, bytes = manifest.total_bytes(), "archive cached");
        Ok(Arc::new(ArchiveData {
            key: key.clone(),
            stem: stem.to_string(),
            dir: final_dir,
            manifest,
        }))
    }

    /// Deletes least-recently-accessed idle entries until the cache fits its
    /// byte budget, plus any idle entry unused past the age ceiling. The
    /// just-inserted `keep` entry is never a candidate.
    fn evict(inner: &Arc<Inner>, keep: &str) {
        let rows = match inner.meta.list() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "eviction skipped: cannot list cache metadata");
                return;
            }
        };
        let mut total: u64 = rows.iter().map(|r| r.bytes).sum();
        let now = meta::unix_now();
        let max_age = inner.max_entry_age.as_secs() as i64;

        for row in rows {
            if row.stem == keep {
                continue;
            }
            let too_old = now.saturating_sub(row.last_access) > max_age;
            if total <= inner.max_cache_bytes && !too_old {
                continue;
            }

            {
                let mut state = lock(&inner.state);
                if let Some(r) = state.resident.get(&row.stem) {
                    if r.refs > 0 {
                        continue; // in use, try again next round
                    }
                }
                state.resident.remove(&row.stem);
            }

            if let Err(e) = std::fs::remove_dir_all(inner.root.join(&row.stem)) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(stem = %row.stem, error = %e, "failed to delete evicted archive");
                }
            }
            if let Err(e) = inner.meta.remove(&row.stem) {
                tracing::warn!(stem = %row.stem, error = %e, "failed to drop evicted metadata");
            }
            total = total.saturating_sub(row.bytes);
            tracing::info!(stem = %row.stem, bytes = row.bytes, too_old, "evicted archive");
        }
    }
}
