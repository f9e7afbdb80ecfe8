//! Service configuration knobs.
//!
//! All limits live here so operators have one place to look. Values come
//! from `Default` or from `SNAPGREP_*` environment variables via
//! [`Settings::from_env`]; a malformed variable falls back to the default
//! with a warning rather than failing startup.

use std::time::Duration;

/// Tunable limits for the search service.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Ceiling on the cumulative path-string length of a changed-paths diff.
    /// Beyond this the hybrid coordinator gives up and requests a full
    /// unindexed scan.
    pub max_total_paths_length: usize,
    /// Maximum total bytes of cached archives on disk.
    pub max_cache_bytes: u64,
    /// Worker count for parallel file scanning (0 = number of CPUs).
    pub file_parallelism: usize,
    /// Context lines included on each side of a chunk match.
    pub context_lines: usize,
    /// Files larger than this are dropped at archive ingest unless an
    /// always-search glob matches their path.
    pub max_file_size_bytes: u64,
    /// Globs for paths that are searched regardless of file size.
    pub always_search_globs: Vec<String>,
    /// Whether the hybrid (index-reconciling) path is attempted at all.
    pub hybrid_enabled: bool,
    /// Cached archives unused for longer than this are evicted.
    pub max_entry_age: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_total_paths_length: 100_000,
            max_cache_bytes: 10 * 1024 * 1024 * 1024, // 10 GiB
            file_parallelism: 0,                      // auto-detect
            context_lines: 0,
            max_file_size_bytes: 2 * 1024 * 1024, // 2 MiB
            always_search_globs: Vec::new(),
            hybrid_enabled: true,
            max_entry_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Settings {
    /// Loads settings from `SNAPGREP_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut s = Self::default();
        read_env("SNAPGREP_MAX_TOTAL_PATHS_LENGTH", &mut s.max_total_paths_length);
        read_env("SNAPGREP_MAX_CACHE_BYTES", &mut s.max_cache_bytes);
        read_env("SNAPGREP_FILE_PARALLELISM", &mut s.file_parallelism);
        read_env("SNAPGREP_CONTEXT_LINES", &mut s.context_lines);
        read_env("SNAPGREP_MAX_FILE_SIZE_BYTES", &mut s.max_file_size_bytes);
        read_env("SNAPGREP_HYBRID_ENABLED", &mut s.hybrid_enabled);

        if let Ok(globs) = std::env::var("SNAPGREP_ALWAYS_SEARCH_GLOBS") {
            s.always_search_globs = globs
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
        }
        let mut age_secs = s.max_entry_age.as_secs();
        read_env("SNAPGREP_MAX_ENTRY_AGE_SECS", &mut age_secs);
        s.max_entry_age = Duration::from_secs(age_secs);

        s
    }

    /// Effective scan worker count.
    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        if self.file_parallelism > 0 {
            self.file_parallelism
        } else {
            std::thread::available_parallelism().map_or(4, |n| n.get())
        }
    }
}

fn read_env<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => {
                tracing::warn!(%name, %raw, "ignoring unparsable environment variable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let s = Settings::default();
        assert!(s.hybrid_enabled);
        assert_eq!(s.context_lines, 0);
        assert!(s.max_cache_bytes > s.max_file_size_bytes);
        assert!(s.effective_parallelism() >= 1);
    }

    #[test]
    fn test_explicit_parallelism_wins() {
        let s = Settings {
            file_parallelism: 3,
            ..Settings::default()
        };
        assert_eq!(s.effective_parallelism(), 3);
    }
}
