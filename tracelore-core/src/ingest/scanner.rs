//! File discovery and incremental tailing
//!
//! The scanner globs the root directory for log files, and on every poll
//! reports the newly appended byte range of each file, consulting the offset
//! tracker for resume positions. Rotation is detected via head fingerprints
//! and resets the file to offset zero. Files that vanish from a scan are
//! marked stale and only forgotten after a grace period, so atomic
//! rename-based rotation does not drop state prematurely.
//!
//! The scanner keeps its own in-memory read watermark per file (bytes already
//! handed to the pipeline) separate from the tracker's committed offset, so
//! slices queued but not yet flushed are not re-read on the next poll.

use crate::error::{Error, Result};
use crate::ingest::tracker::{fingerprint_file, FingerprintCheck, OffsetTracker};
use crate::types::Fingerprint;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A newly appended byte range of one tracked file.
#[derive(Debug, Clone)]
pub struct FileSlice {
    pub path: PathBuf,
    /// First byte to read
    pub start: u64,
    /// One past the last byte to read
    pub end: u64,
    /// Head fingerprint observed at poll time
    pub fingerprint: Fingerprint,
    /// File size at poll time
    pub size: u64,
    /// Modification time at poll time
    pub modified_at: Option<DateTime<Utc>>,
}

/// Complete lines read from a slice.
///
/// `consumed_end` stops before an incomplete trailing line, which will be
/// picked up by a later poll once the producer finishes writing it.
#[derive(Debug)]
pub struct SliceData {
    /// (byte offset of line start, line content without the newline)
    pub lines: Vec<(u64, String)>,
    pub consumed_end: u64,
}

/// List files matching `pattern` under `root`.
pub fn discover_paths(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full_pattern = root.join(pattern);
    let pattern_str = full_pattern.to_string_lossy();

    let entries = glob::glob(&pattern_str)
        .map_err(|e| Error::Config(format!("invalid glob pattern {:?}: {}", pattern, e)))?;

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Read the complete lines of a slice.
pub fn read_slice(path: &Path, start: u64, end: u64) -> std::io::Result<SliceData> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut reader = BufReader::new(file.take(end.saturating_sub(start)));

    let mut lines = Vec::new();
    let mut offset = start;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        if buf.last() != Some(&b'\n') {
            // Incomplete trailing line; leave it for a later poll
            break;
        }
        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
        lines.push((offset, line));
        offset += n as u64;
    }

    Ok(SliceData {
        lines,
        consumed_end: offset,
    })
}

/// Discovers files and detects per-file growth, rotation, and disappearance.
pub struct FileScanner {
    root: PathBuf,
    pattern: String,
    stale_grace: Duration,
    tracker: Arc<OffsetTracker>,
    /// Bytes already handed to the pipeline, per file
    read_marks: HashMap<PathBuf, u64>,
    /// When each missing file was first noticed
    missing_since: HashMap<PathBuf, Instant>,
}

impl FileScanner {
    pub fn new(
        root: PathBuf,
        pattern: String,
        stale_grace: Duration,
        tracker: Arc<OffsetTracker>,
    ) -> Self {
        Self {
            root,
            pattern,
            stale_grace,
            tracker,
            read_marks: HashMap::new(),
            missing_since: HashMap::new(),
        }
    }

    /// Files currently matching the pattern under the root.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        discover_paths(&self.root, &self.pattern)
    }

    /// One scan: returns the newly appended byte range of every file that
    /// grew since its read watermark.
    pub fn poll_once(&mut self) -> Result<Vec<FileSlice>> {
        let discovered = self.discover()?;
        let discovered_set: HashSet<&PathBuf> = discovered.iter().collect();
        let mut slices = Vec::new();

        for path in &discovered {
            let metadata = match std::fs::metadata(path) {
                Ok(m) => m,
                Err(e) => {
                    // Temporarily unreadable; retried on the next poll
                    tracing::warn!(path = %path.display(), error = %e, "Failed to stat file");
                    continue;
                }
            };
            let size = metadata.len();
            let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);

            match self.tracker.verify(path, size) {
                Ok(FingerprintCheck::Match) | Ok(FingerprintCheck::New) => {}
                Ok(FingerprintCheck::Mismatch) => {
                    self.tracker.reset(path)?;
                    self.read_marks.insert(path.clone(), 0);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to fingerprint file");
                    continue;
                }
            }

            self.tracker.observe(path, size, modified_at);
            self.missing_since.remove(path);

            let mark = *self
                .read_marks
                .entry(path.clone())
                .or_insert_with(|| self.tracker.offset(path));

            if size > mark {
                let fingerprint = match fingerprint_file(path, size) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to fingerprint file");
                        continue;
                    }
                };
                slices.push(FileSlice {
                    path: path.clone(),
                    start: mark,
                    end: size,
                    fingerprint,
                    size,
                    modified_at,
                });
            }
        }

        // Files that vanished: stale first, forgotten after the grace period
        let now = Instant::now();
        let mut to_forget = Vec::new();
        for tracked in self.tracker.paths() {
            if discovered_set.contains(&tracked) {
                continue;
            }
            let since = *self.missing_since.entry(tracked.clone()).or_insert(now);
            if now.duration_since(since) >= self.stale_grace {
                to_forget.push(tracked);
            } else {
                self.tracker.mark_stale(&tracked)?;
            }
        }
        for path in to_forget {
            self.tracker.forget(&path)?;
            self.read_marks.remove(&path);
            self.missing_since.remove(&path);
        }

        Ok(slices)
    }

    /// Record that bytes up to `consumed_end` have been handed to the
    /// pipeline for this file.
    pub fn mark_read(&mut self, path: &Path, consumed_end: u64) {
        let mark = self.read_marks.entry(path.to_path_buf()).or_insert(0);
        if consumed_end > *mark {
            *mark = consumed_end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::io::Write;

    fn scanner_with(dir: &Path, grace: Duration) -> FileScanner {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.migrate().unwrap();
        let tracker = Arc::new(OffsetTracker::load(store).unwrap());
        FileScanner::new(dir.to_path_buf(), "*.jsonl".to_string(), grace, tracker)
    }

    fn append(path: &Path, content: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_discover_matches_pattern() {
        let dir = tempfile::tempdir().unwrap();
        append(&dir.path().join("a.jsonl"), "{}\n");
        append(&dir.path().join("b.jsonl"), "{}\n");
        append(&dir.path().join("notes.txt"), "ignored\n");

        let scanner = scanner_with(dir.path(), Duration::from_secs(60));
        let paths = scanner.discover().unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.extension().unwrap() == "jsonl"));
    }

    #[test]
    fn test_poll_reports_growth_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        append(&path, "first line\n");

        let mut scanner = scanner_with(dir.path(), Duration::from_secs(60));

        let slices = scanner.poll_once().unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].start, 0);
        assert_eq!(slices[0].end, 11);
        scanner.mark_read(&path, 11);

        // Nothing new: no slices
        assert!(scanner.poll_once().unwrap().is_empty());

        // Growth produces a slice starting at the watermark
        append(&path, "second line\n");
        let slices = scanner.poll_once().unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].start, 11);
        assert_eq!(slices[0].end, 23);
    }

    #[test]
    fn test_rotation_resets_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        append(&path, "generation one, long enough to matter\n");

        let mut scanner = scanner_with(dir.path(), Duration::from_secs(60));
        let slices = scanner.poll_once().unwrap();
        let end = slices[0].end;
        scanner.mark_read(&path, end);
        let tracker = scanner.tracker.clone();
        tracker
            .advance(
                &path,
                end,
                slices[0].fingerprint.clone(),
                slices[0].size,
                slices[0].modified_at,
            )
            .unwrap();

        // Replace the file contents entirely (rotation)
        std::fs::write(&path, "fresh generation\n").unwrap();
        let slices = scanner.poll_once().unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].start, 0, "rotated file must restart at zero");
        assert_eq!(tracker.offset(&path), 0);
    }

    #[test]
    fn test_missing_file_forgotten_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        append(&path, "here today\n");

        let mut scanner = scanner_with(dir.path(), Duration::ZERO);
        scanner.poll_once().unwrap();
        assert_eq!(scanner.tracker.len(), 1);

        std::fs::remove_file(&path).unwrap();
        scanner.poll_once().unwrap();
        assert_eq!(scanner.tracker.len(), 0, "zero grace forgets immediately");
    }

    #[test]
    fn test_read_slice_stops_before_incomplete_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        append(&path, "complete one\ncomplete two\npartial without newline");

        let size = std::fs::metadata(&path).unwrap().len();
        let data = read_slice(&path, 0, size).unwrap();
        assert_eq!(data.lines.len(), 2);
        assert_eq!(data.lines[0], (0, "complete one".to_string()));
        assert_eq!(data.lines[1], (13, "complete two".to_string()));
        assert_eq!(data.consumed_end, 26);

        // Finish the line: the next slice picks it up from consumed_end
        append(&path, "\n");
        let size = std::fs::metadata(&path).unwrap().len();
        let data = read_slice(&path, 26, size).unwrap();
        assert_eq!(data.lines.len(), 1);
        assert_eq!(data.lines[0].1, "partial without newline");
        assert_eq!(data.consumed_end, size);
    }
}
