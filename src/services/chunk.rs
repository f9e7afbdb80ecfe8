//! Chunk assembly: match ranges to line-aligned chunk windows.
//!
//! A chunk covers whole lines: the lines spanned by a match plus the
//! configured context lines on each side. Windows that overlap or sit on
//! adjacent lines merge into one chunk. Offsets are byte offsets from file
//! start, lines count `\n`, columns count UTF-8 code points from line start.

use crate::protocol::{ChunkMatch, Location, MatchRange};
use memchr::memchr_iter;
use std::ops::Range;

/// Byte offsets of every line start, built once per file.
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    #[must_use]
    pub fn new(content: &[u8]) -> Self {
        let mut line_starts = Vec::with_capacity(128);
        line_starts.push(0);
        for nl in memchr_iter(b'\n', content) {
            line_starts.push(nl + 1);
        }
        Self {
            line_starts,
            len: content.len(),
        }
    }

    /// 0-based line number containing the byte at `offset`.
    #[must_use]
    pub fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&s| s <= offset) - 1
    }

    /// Byte offset of the first byte of `line`.
    #[must_use]
    pub fn line_start(&self, line: usize) -> usize {
        self.line_starts[line.min(self.line_starts.len() - 1)]
    }

    /// Byte offset just past `line`, including its newline.
    #[must_use]
    pub fn line_end(&self, line: usize) -> usize {
        match self.line_starts.get(line + 1) {
            Some(&next) => next,
            None => self.len,
        }
    }

    /// Last line number (0-based). Empty content has a single line 0.
    #[must_use]
    pub fn last_line(&self) -> usize {
        self.line_starts.len() - 1
    }

    /// Full location for a byte offset.
    #[must_use]
    pub fn location(&self, content: &[u8], offset: usize) -> Location {
        let line = self.line_of(offset);
        let start = self.line_start(line);
        Location {
            offset: offset as u64,
            line: line as u64,
            column: count_code_points(&content[start..offset]) as u64,
        }
    }
}

// Code points = bytes that are not UTF-8 continuation bytes. Invalid bytes
// count one column each, matching the lossy decoding of chunk content.
fn count_code_points(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| (b & 0xC0) != 0x80).count()
}

/// Builds merged chunk matches for `ranges`, which must be sorted by start
/// offset and lie within `content`.
#[must_use]
pub fn build_chunks(
    content: &[u8],
    ranges: &[Range<usize>],
    context_lines: usize,
) -> Vec<ChunkMatch> {
    if ranges.is_empty() {
        return Vec::new();
    }
    let index = LineIndex::new(content);
    let last_line = index.last_line();

    // Line windows per range, context on both sides
    let mut windows: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for r in ranges {
        let first = index.line_of(r.start).saturating_sub(context_lines);
        // A range's end is exclusive; its last byte is at end - 1
        let end_byte = r.end.saturating_sub(1).max(r.start);
        let last = index
            .line_of(end_byte)
            .saturating_add(context_lines)
            .min(last_line);
        windows.push((first, last));
    }

    // Merge overlapping or line-adjacent windows. Window starts are
    // monotonic because the ranges are sorted.
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(windows.len());
    for (first, last) in windows {
        match merged.last_mut() {
            Some((_, prev_last)) if first <= *prev_last + 1 => {
                *prev_last = (*prev_last).max(last);
            }
            _ => merged.push((first, last)),
        }
    }

    let mut chunks = Vec::with_capacity(merged.len());
    for (first, last) in merged {
        let start = index.line_start(first);
        let end = index.line_end(last);
        let chunk_ranges: Vec<MatchRange> = ranges
            .iter()
            .filter(|r| r.start >= start && r.start < end)
            .map(|r| MatchRange {
                start: index.location(content, r.start),
                end: index.location(content, r.end),
            })
            .collect();
        chunks.push(ChunkMatch {
            content: String::from_utf8_lossy(&content[start..end]).into_owned(),
            content_start: Location {
                offset: start as u64,
                line: first as u64,
                column: 0,
            },
            ranges: chunk_ranges,
        });
    }
    chunks
}
